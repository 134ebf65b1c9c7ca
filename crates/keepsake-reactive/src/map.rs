//! [`ReactiveMap<K, V>`]: an observable key-value mapping.
//!
//! Two audiences: snapshot listeners receive the whole map after every
//! mutation, entry listeners receive `(key, new value)` for single-key
//! mutations (`None` on removal). Bulk mutations only reach snapshot
//! listeners.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use keepsake_sched::isolate;

use crate::subscription::Subscription;
use crate::{lock, take_by_id};

type MapListener<K, V> = Arc<dyn Fn(&Arc<BTreeMap<K, V>>) + Send + Sync>;
type EntryListener<K, V> = Arc<dyn Fn(&K, Option<&V>) + Send + Sync>;

/// A shared observable map with ordered keys. Cloning yields another handle
/// to the same map.
pub struct ReactiveMap<K, V> {
    inner: Arc<MapInner<K, V>>,
}

struct MapInner<K, V> {
    state: Mutex<MapState<K, V>>,
    next_id: AtomicU64,
}

struct MapState<K, V> {
    entries: BTreeMap<K, V>,
    version: u64,
    map_listeners: Vec<(u64, MapListener<K, V>)>,
    entry_listeners: Vec<(u64, EntryListener<K, V>)>,
}

struct EntryChange<K, V> {
    key: K,
    value: Option<V>,
    listeners: Vec<EntryListener<K, V>>,
}

struct MapNotice<K, V> {
    entry: Option<EntryChange<K, V>>,
    snapshot: Arc<BTreeMap<K, V>>,
    listeners: Vec<MapListener<K, V>>,
}

impl<K, V> MapNotice<K, V> {
    fn deliver(self) {
        if let Some(change) = &self.entry {
            for listener in &change.listeners {
                isolate("reactive map entry listener", || {
                    listener(&change.key, change.value.as_ref());
                });
            }
        }
        for listener in &self.listeners {
            isolate("reactive map listener", || listener(&self.snapshot));
        }
    }
}

impl<K: Clone, V: Clone> MapState<K, V> {
    fn publish(&mut self, entry: Option<(K, Option<V>)>) -> MapNotice<K, V> {
        self.version = self.version.wrapping_add(1);
        let entry = entry.map(|(key, value)| EntryChange {
            key,
            value,
            listeners: self
                .entry_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
        });
        MapNotice {
            entry,
            snapshot: Arc::new(self.entries.clone()),
            listeners: self
                .map_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
        }
    }
}

impl<K, V> Clone for ReactiveMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ReactiveMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// An empty map.
    pub fn empty() -> Self {
        Self::of(BTreeMap::new())
    }

    /// A map holding `entries`, at version 0.
    pub fn of(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            inner: Arc::new(MapInner {
                state: Mutex::new(MapState {
                    entries: entries.into_iter().collect(),
                    version: 0,
                    map_listeners: Vec::new(),
                    entry_listeners: Vec::new(),
                }),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MapState<K, V>> {
        lock(&self.inner.state)
    }

    /// Insert or replace the value under `key`, returning the previous one.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let (previous, notice) = {
            let mut state = self.lock();
            let previous = state.entries.insert(key.clone(), value.clone());
            (previous, state.publish(Some((key, Some(value)))))
        };
        notice.deliver();
        previous
    }

    /// Remove `key`, returning its value. Listeners fire only when the key
    /// was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let (previous, notice) = {
            let mut state = self.lock();
            let previous = state.entries.remove(key)?;
            (previous, state.publish(Some((key.clone(), None))))
        };
        notice.deliver();
        Some(previous)
    }

    /// Insert every entry from `iter` as one mutation.
    pub fn extend(&self, iter: impl IntoIterator<Item = (K, V)>) {
        let notice = {
            let mut state = self.lock();
            state.entries.extend(iter);
            state.publish(None)
        };
        notice.deliver();
    }

    /// Replace the whole contents as one mutation.
    pub fn replace_all(&self, iter: impl IntoIterator<Item = (K, V)>) {
        let replacement: BTreeMap<K, V> = iter.into_iter().collect();
        let notice = {
            let mut state = self.lock();
            state.entries = replacement;
            state.publish(None)
        };
        notice.deliver();
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let notice = {
            let mut state = self.lock();
            state.entries.clear();
            state.publish(None)
        };
        notice.deliver();
    }

    /// A clone of the value under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().entries.get(key).cloned()
    }

    /// The value under `key`, or `default` when absent.
    pub fn get_or(&self, key: &K, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// An immutable copy of the current contents.
    pub fn snapshot(&self) -> Arc<BTreeMap<K, V>> {
        Arc::new(self.lock().entries.clone())
    }

    /// Number of mutations since construction.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Remove every snapshot and entry listener.
    pub fn clear_listeners(&self) {
        let removed = {
            let mut state = self.lock();
            (
                std::mem::take(&mut state.map_listeners),
                std::mem::take(&mut state.entry_listeners),
            )
        };
        drop(removed);
    }

    /// Number of registered snapshot and entry listeners.
    pub fn listener_count(&self) -> usize {
        let state = self.lock();
        state
            .map_listeners
            .len()
            .saturating_add(state.entry_listeners.len())
    }

    /// Listen for every mutation; `listener` receives the post-mutation
    /// snapshot.
    pub fn on_change(
        &self,
        listener: impl Fn(&Arc<BTreeMap<K, V>>) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().map_listeners.push((id, Arc::new(listener)));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = take_by_id(&mut lock(&inner.state).map_listeners, id);
                drop(removed);
            }
        })
    }

    /// Listen for single-key mutations; `listener` receives the key and its
    /// new value, `None` when it was removed.
    pub fn on_entry(&self, listener: impl Fn(&K, Option<&V>) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().entry_listeners.push((id, Arc::new(listener)));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = take_by_id(&mut lock(&inner.state).entry_listeners, id);
                drop(removed);
            }
        })
    }
}

impl<K, V> Default for ReactiveMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for ReactiveMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ReactiveMap")
            .field("entries", &state.entries)
            .field("version", &state.version)
            .finish_non_exhaustive()
    }
}
