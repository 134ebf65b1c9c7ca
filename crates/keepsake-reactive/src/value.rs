//! [`Reactive<T>`]: a version-tracked observable value.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use keepsake_sched::isolate;

use crate::dispatch::{ChangeListener, Dependent, Dispatch, SetListener, Teardown};
use crate::subscription::Subscription;
use crate::{lock, take_by_id};

/// A shared observable value.
///
/// Cloning yields another handle to the same value. Every accepted write
/// bumps [`version`](Self::version), including writes of an equal value;
/// listeners only hear about writes that actually change it.
///
/// After [`destroy`](Self::destroy) the value keeps its last content but
/// ignores writes, subscriptions and notifications.
pub struct Reactive<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

pub(crate) struct Inner<T> {
    state: Mutex<State<T>>,
    next_id: AtomicU64,
}

struct State<T> {
    value: T,
    version: u64,
    batching: bool,
    batched: Option<T>,
    destroyed: bool,
    change_listeners: Vec<(u64, ChangeListener<T>)>,
    set_listeners: Vec<(u64, SetListener<T>)>,
    dependents: Vec<(u64, Arc<dyn Dependent>)>,
    upstream: Vec<Subscription>,
    teardown: Vec<Teardown>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        lock(&self.state)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl<T> Drop for Inner<T> {
    // The last handle is gone: release registrations on other values so
    // they stop feeding a value nobody can observe.
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.destroyed {
            return;
        }
        for upstream in mem::take(&mut state.upstream) {
            upstream.unsubscribe();
        }
        for hook in mem::take(&mut state.teardown) {
            isolate("reactive teardown", hook);
        }
    }
}

impl<T> Clone for Reactive<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Reactive<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a value with version 0 and no listeners.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    value: initial,
                    version: 0,
                    batching: false,
                    batched: None,
                    destroyed: false,
                    change_listeners: Vec::new(),
                    set_listeners: Vec::new(),
                    dependents: Vec::new(),
                    upstream: Vec::new(),
                    teardown: Vec::new(),
                }),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Alias for [`new`](Self::new).
    pub fn of(initial: T) -> Self {
        Self::new(initial)
    }

    /// A clone of the current value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Read the current value in place.
    ///
    /// `f` runs under the value's lock and must not access this value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock().value)
    }

    /// Number of accepted writes since construction.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// Number of registered change and set listeners.
    pub fn listener_count(&self) -> usize {
        let state = self.inner.lock();
        state
            .change_listeners
            .len()
            .saturating_add(state.set_listeners.len())
    }

    /// Number of derived values currently fed by this value.
    pub fn dependent_count(&self) -> usize {
        self.inner.lock().dependents.len()
    }

    /// Replace the value and notify listeners if it changed.
    ///
    /// While a batch is open the write is buffered instead.
    pub fn set(&self, value: T) {
        let dispatch = {
            let mut state = self.inner.lock();
            state.apply(value, true)
        };
        self.deliver(dispatch);
    }

    /// Replace the value with `f(current)`, atomically with respect to
    /// other writers, and notify as [`set`](Self::set) does.
    ///
    /// `f` runs under the value's lock and must not access this value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let dispatch = {
            let mut state = self.inner.lock();
            if state.destroyed {
                return;
            }
            let next = f(&state.value);
            state.apply(next, true)
        };
        self.deliver(dispatch);
    }

    /// Replace the value without notifying anyone. The version still
    /// advances, and an open batch adopts the new value.
    pub fn set_silent(&self, value: T) {
        let mut state = self.inner.lock();
        if state.destroyed {
            return;
        }
        if state.batching {
            state.batched = Some(value.clone());
        }
        state.value = value;
        state.version = state.version.wrapping_add(1);
    }

    /// Start buffering writes. Only the last buffered write is applied, by
    /// [`end_batch`](Self::end_batch).
    pub fn begin_batch(&self) -> &Self {
        let mut state = self.inner.lock();
        if !state.destroyed {
            state.batching = true;
            state.batched = None;
        }
        self
    }

    /// Apply the last buffered write as one notified set. Does nothing if
    /// no batch is open or nothing was written during it; an empty batch
    /// leaves the version where it was and makes the value look clean to
    /// anything comparing versions.
    pub fn end_batch(&self) -> &Self {
        let dispatch = {
            let mut state = self.inner.lock();
            if state.destroyed || !state.batching {
                return self;
            }
            state.batching = false;
            match state.batched.take() {
                Some(pending) => state.apply(pending, false),
                None => None,
            }
        };
        self.deliver(dispatch);
        self
    }

    /// Run `f` inside a batch.
    pub fn batch(&self, f: impl FnOnce(&Self)) {
        self.begin_batch();
        f(self);
        self.end_batch();
    }

    /// Listen for changes; `listener` receives `(old, new)`.
    pub fn on_change(&self, listener: impl Fn(&T, &T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id();
        {
            let mut state = self.inner.lock();
            if state.destroyed {
                return Subscription::inert();
            }
            state.change_listeners.push((id, Arc::new(listener)));
        }
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = take_by_id(&mut inner.lock().change_listeners, id);
                drop(removed);
            }
        })
    }

    /// Listen for notified sets; `listener` receives the new value.
    pub fn on_set(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id();
        {
            let mut state = self.inner.lock();
            if state.destroyed {
                return Subscription::inert();
            }
            state.set_listeners.push((id, Arc::new(listener)));
        }
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = take_by_id(&mut inner.lock().set_listeners, id);
                drop(removed);
            }
        })
    }

    /// Remove every change and set listener.
    pub fn clear_listeners(&self) {
        let removed = {
            let mut state = self.inner.lock();
            (
                mem::take(&mut state.change_listeners),
                mem::take(&mut state.set_listeners),
            )
        };
        drop(removed);
    }

    /// Tear the value down.
    ///
    /// Destroys every derived value first, then drops listeners, releases
    /// registrations on upstream values and runs teardown callbacks.
    /// Idempotent.
    pub fn destroy(&self) {
        let (dependents, listeners, upstream, teardown) = {
            let mut state = self.inner.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.batching = false;
            state.batched = None;
            (
                mem::take(&mut state.dependents),
                (
                    mem::take(&mut state.change_listeners),
                    mem::take(&mut state.set_listeners),
                ),
                mem::take(&mut state.upstream),
                mem::take(&mut state.teardown),
            )
        };
        for (_, dependent) in dependents {
            isolate("derived value destroy", || dependent.destroy());
        }
        drop(listeners);
        for subscription in upstream {
            subscription.unsubscribe();
        }
        for hook in teardown {
            isolate("reactive teardown", hook);
        }
        tracing::trace!("reactive value destroyed");
    }

    fn deliver(&self, dispatch: Option<Dispatch<T>>) {
        let Some(dispatch) = dispatch else {
            return;
        };
        if !self.is_destroyed() {
            dispatch.deliver();
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner<T>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<Inner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Register a derived node. Returns `None` when this value is already
    /// destroyed.
    pub(crate) fn add_dependent(&self, node: Arc<dyn Dependent>) -> Option<u64> {
        let id = self.inner.next_id();
        let mut state = self.inner.lock();
        if state.destroyed {
            return None;
        }
        state.dependents.push((id, node));
        Some(id)
    }

    pub(crate) fn remove_dependent(&self, id: u64) {
        let removed = take_by_id(&mut self.inner.lock().dependents, id);
        drop(removed);
    }

    /// Keep `subscription` until this value is destroyed or dropped.
    pub(crate) fn attach_upstream(&self, subscription: Subscription) {
        let mut state = self.inner.lock();
        if state.destroyed {
            drop(state);
            subscription.unsubscribe();
            return;
        }
        state.upstream.push(subscription);
    }

    /// Run `hook` when this value is destroyed or dropped.
    pub(crate) fn add_teardown(&self, hook: Teardown) {
        let mut state = self.inner.lock();
        if state.destroyed {
            drop(state);
            isolate("reactive teardown", hook);
            return;
        }
        state.teardown.push(hook);
    }
}

impl<T: Clone + PartialEq> State<T> {
    /// Store `value` and build the notification it requires, if any.
    fn apply(&mut self, value: T, honor_batching: bool) -> Option<Dispatch<T>> {
        if self.destroyed {
            return None;
        }
        if honor_batching && self.batching {
            self.batched = Some(value);
            return None;
        }
        let old = mem::replace(&mut self.value, value);
        self.version = self.version.wrapping_add(1);
        if old == self.value {
            return None;
        }
        Some(Dispatch {
            old,
            new: self.value.clone(),
            change: self
                .change_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
            set: self
                .set_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
            dependents: self
                .dependents
                .iter()
                .map(|(_, dependent)| Arc::clone(dependent))
                .collect(),
        })
    }
}

impl<T> Default for Reactive<T>
where
    T: Default + Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Reactive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Reactive")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("destroyed", &state.destroyed)
            .finish_non_exhaustive()
    }
}
