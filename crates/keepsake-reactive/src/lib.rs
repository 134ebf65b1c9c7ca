//! Observable values and collections for the Keepsake state store.
//!
//! # Modules
//!
//! - [`value`] -- [`Reactive<T>`], a version-tracked cell with change
//!   listeners, batching and explicit teardown.
//! - [`derived`] -- values computed from other values: `map`, `combine`,
//!   `distinct_until_changed`, `throttle`, `debounce`, async loaders.
//! - [`list`] / [`map`] -- [`ReactiveList<T>`] and [`ReactiveMap<K, V>`],
//!   publishing whole-collection snapshots on every mutation.
//! - [`subscription`] -- [`Subscription`] handles returned by every
//!   `on_*` method.
//! - [`versioned`] -- [`Versioned`] and [`VersionWatch`] for pollers.
//! - [`numeric`] -- counter helpers for numeric values.
//!
//! # Notification order
//!
//! For a single value: on-change listeners, then on-set listeners, then
//! derived values, each group in subscription order. Dispatch always walks a
//! snapshot taken under the value's lock and runs after the lock is
//! released, so listeners may freely read, write, subscribe or unsubscribe.
//! A panicking listener is logged and skipped.

pub mod derived;
mod dispatch;
pub mod error;
pub mod list;
pub mod map;
pub mod numeric;
pub mod subscription;
pub mod value;
pub mod versioned;

pub use error::ReactiveError;
pub use list::ReactiveList;
pub use map::ReactiveMap;
pub use numeric::Numeric;
pub use subscription::Subscription;
pub use value::Reactive;
pub use versioned::{VersionWatch, Versioned};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Listener code never runs under these locks, so poisoning can only come
/// from a panicking `update` closure; the protected data is still coherent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove the entry registered under `id`, returning it so the caller can
/// drop it after releasing the lock.
pub(crate) fn take_by_id<L>(entries: &mut Vec<(u64, L)>, id: u64) -> Option<L> {
    let position = entries.iter().position(|(entry_id, _)| *entry_id == id)?;
    Some(entries.remove(position).1)
}
