//! [`ReactiveList<T>`]: an observable ordered sequence.
//!
//! Every successful mutation bumps the version and hands each listener an
//! immutable snapshot of the whole list. There is no per-element delta.

use std::cmp::Ordering as CmpOrdering;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use keepsake_sched::isolate;

use crate::error::ReactiveError;
use crate::subscription::Subscription;
use crate::{lock, take_by_id};

type ListListener<T> = Arc<dyn Fn(&Arc<[T]>) + Send + Sync>;

/// A shared observable list. Cloning yields another handle to the same list.
pub struct ReactiveList<T> {
    inner: Arc<ListInner<T>>,
}

struct ListInner<T> {
    state: Mutex<ListState<T>>,
    next_id: AtomicU64,
}

struct ListState<T> {
    items: Vec<T>,
    version: u64,
    listeners: Vec<(u64, ListListener<T>)>,
}

/// Snapshot plus audience, delivered after the lock is released.
struct ListNotice<T> {
    snapshot: Arc<[T]>,
    listeners: Vec<ListListener<T>>,
}

impl<T> ListNotice<T> {
    fn deliver(self) {
        for listener in &self.listeners {
            isolate("reactive list listener", || listener(&self.snapshot));
        }
    }
}

impl<T: Clone> ListState<T> {
    fn publish(&mut self) -> ListNotice<T> {
        self.version = self.version.wrapping_add(1);
        ListNotice {
            snapshot: Arc::from(self.items.as_slice()),
            listeners: self
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
        }
    }
}

impl<T> Clone for ReactiveList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ReactiveList<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// An empty list.
    pub fn empty() -> Self {
        Self::of(Vec::new())
    }

    /// A list holding `items`, at version 0.
    pub fn of(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            inner: Arc::new(ListInner {
                state: Mutex::new(ListState {
                    items: items.into_iter().collect(),
                    version: 0,
                    listeners: Vec::new(),
                }),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListState<T>> {
        lock(&self.inner.state)
    }

    /// Apply `op`; on `Ok` publish the new contents, on `Err` leave the
    /// version untouched.
    fn try_mutate<R, E>(&self, op: impl FnOnce(&mut Vec<T>) -> Result<R, E>) -> Result<R, E> {
        let (result, notice) = {
            let mut state = self.lock();
            let result = op(&mut state.items)?;
            (result, state.publish())
        };
        notice.deliver();
        Ok(result)
    }

    fn mutate<R>(&self, op: impl FnOnce(&mut Vec<T>) -> R) -> R {
        match self.try_mutate(|items| Ok::<R, Infallible>(op(items))) {
            Ok(result) => result,
            Err(never) => match never {},
        }
    }

    /// Append `item`.
    pub fn push(&self, item: T) {
        self.mutate(|items| items.push(item));
    }

    /// Insert `item` at `index`, shifting later items right.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::IndexOutOfBounds`] when `index > len`.
    pub fn insert(&self, index: usize, item: T) -> Result<(), ReactiveError> {
        self.try_mutate(|items| {
            if index > items.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, item);
            Ok(())
        })
    }

    /// Remove and return the item at `index`.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::IndexOutOfBounds`] when `index >= len`.
    pub fn remove_at(&self, index: usize) -> Result<T, ReactiveError> {
        self.try_mutate(|items| {
            if index >= items.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            Ok(items.remove(index))
        })
    }

    /// Replace the item at `index`, returning the previous one.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::IndexOutOfBounds`] when `index >= len`.
    pub fn set(&self, index: usize, item: T) -> Result<T, ReactiveError> {
        self.try_mutate(|items| {
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(ReactiveError::IndexOutOfBounds { index, len })?;
            Ok(std::mem::replace(slot, item))
        })
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.mutate(Vec::clear);
    }

    /// Append every item from `iter` as one mutation.
    pub fn extend(&self, iter: impl IntoIterator<Item = T>) {
        self.mutate(|items| items.extend(iter));
    }

    /// Replace the whole contents as one mutation.
    pub fn replace_all(&self, iter: impl IntoIterator<Item = T>) {
        let replacement: Vec<T> = iter.into_iter().collect();
        self.mutate(|items| *items = replacement);
    }

    /// Stable-sort with `compare`.
    pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> CmpOrdering) {
        self.mutate(|items| items.sort_by(compare));
    }

    /// A clone of the item at `index`.
    pub fn get(&self, index: usize) -> Option<T> {
        self.lock().items.get(index).cloned()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the list has no items.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// An immutable copy of the current contents.
    pub fn snapshot(&self) -> Arc<[T]> {
        Arc::from(self.lock().items.as_slice())
    }

    /// A plain `Vec` copy of the current contents.
    pub fn to_vec(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    /// Number of mutations since construction.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Remove every listener.
    pub fn clear_listeners(&self) {
        let removed = std::mem::take(&mut self.lock().listeners);
        drop(removed);
    }

    /// Listen for mutations; `listener` receives the post-mutation snapshot.
    pub fn on_change(&self, listener: impl Fn(&Arc<[T]>) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().listeners.push((id, Arc::new(listener)));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = take_by_id(&mut lock(&inner.state).listeners, id);
                drop(removed);
            }
        })
    }
}

impl<T> ReactiveList<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Remove the first occurrence of `item`. Listeners fire only when
    /// something was removed.
    pub fn remove(&self, item: &T) -> bool {
        self.try_mutate(|items| {
            let index = items.iter().position(|candidate| candidate == item).ok_or(())?;
            items.remove(index);
            Ok::<(), ()>(())
        })
        .is_ok()
    }

    /// Whether `item` is present.
    pub fn contains(&self, item: &T) -> bool {
        self.lock().items.contains(item)
    }

    /// Position of the first occurrence of `item`.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.lock()
            .items
            .iter()
            .position(|candidate| candidate == item)
    }
}

impl<T> ReactiveList<T>
where
    T: Clone + Ord + Send + Sync + 'static,
{
    /// Stable-sort in ascending order.
    pub fn sort(&self) {
        self.mutate(|items| items.sort());
    }
}

impl<T> Default for ReactiveList<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: fmt::Debug> fmt::Debug for ReactiveList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ReactiveList")
            .field("items", &state.items)
            .field("version", &state.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture<T: Clone + Send + Sync + 'static>(
        list: &ReactiveList<T>,
    ) -> Arc<Mutex<Vec<Vec<T>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        list.on_change(move |snapshot| lock(&log).push(snapshot.to_vec()));
        seen
    }

    #[test]
    fn push_publishes_full_snapshot() {
        let list = ReactiveList::of(["x", "y"]);
        let seen = capture(&list);

        list.push("z");

        assert_eq!(lock(&seen).as_slice(), [vec!["x", "y", "z"]]);
        assert_eq!(list.version(), 1);
    }

    #[test]
    fn remove_missing_item_is_silent() {
        let list = ReactiveList::of([1, 2, 3]);
        let seen = capture(&list);

        assert!(!list.remove(&9));
        assert!(list.remove(&2));

        assert_eq!(lock(&seen).as_slice(), [vec![1, 3]]);
        assert_eq!(list.version(), 1);
    }

    #[test]
    fn out_of_range_index_leaves_version_alone() {
        let list = ReactiveList::of(['a']);

        assert_eq!(
            list.insert(5, 'b'),
            Err(ReactiveError::IndexOutOfBounds { index: 5, len: 1 })
        );
        assert!(list.remove_at(1).is_err());
        assert!(list.set(3, 'c').is_err());
        assert_eq!(list.version(), 0);

        assert_eq!(list.set(0, 'z'), Ok('a'));
        assert_eq!(list.version(), 1);
    }

    #[test]
    fn bulk_operations_notify_once() {
        let list = ReactiveList::<u32>::empty();
        let seen = capture(&list);

        list.extend([3, 1, 2]);
        list.sort();
        list.replace_all([7]);
        list.clear();

        assert_eq!(
            lock(&seen).as_slice(),
            [vec![3, 1, 2], vec![1, 2, 3], vec![7], vec![]]
        );
        assert_eq!(list.version(), 4);
    }

    #[test]
    fn unsubscribed_listener_stops_receiving() {
        let list = ReactiveList::of([0_u8]);
        let seen = Arc::new(Mutex::new(0_usize));
        let log = Arc::clone(&seen);
        let sub = list.on_change(move |_| {
            let mut count = lock(&log);
            *count = count.saturating_add(1);
        });

        list.push(1);
        sub.unsubscribe();
        list.push(2);

        assert_eq!(*lock(&seen), 1);
        assert_eq!(list.listener_count(), 0);
    }

    #[test]
    fn listener_can_read_the_list() {
        let list = ReactiveList::of([1_u32]);
        let reader = list.clone();
        let seen = Arc::new(Mutex::new(0_usize));
        let log = Arc::clone(&seen);
        list.on_change(move |_| *lock(&log) = reader.len());

        list.push(2);

        assert_eq!(*lock(&seen), 2);
    }
}
