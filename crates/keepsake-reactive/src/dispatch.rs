//! Notification fan-out shared by observable values.
//!
//! A [`Dispatch`] is built while the source's lock is held and delivered
//! after it is released. Delivery order is fixed: change listeners, set
//! listeners, then dependents.

use std::sync::Arc;

use keepsake_sched::isolate;

/// Listener receiving `(old, new)` on a change.
pub(crate) type ChangeListener<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// Listener receiving the new value on every notified set.
pub(crate) type SetListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback run once when a value is destroyed or dropped.
pub(crate) type Teardown = Box<dyn FnOnce() + Send>;

/// A node in the derived-value graph, registered on each of its sources.
pub(crate) trait Dependent: Send + Sync {
    /// A source published a new value.
    fn recompute(&self);

    /// A source was destroyed.
    fn destroy(&self);
}

/// One pending notification, holding snapshots of every audience.
pub(crate) struct Dispatch<T> {
    pub(crate) old: T,
    pub(crate) new: T,
    pub(crate) change: Vec<ChangeListener<T>>,
    pub(crate) set: Vec<SetListener<T>>,
    pub(crate) dependents: Vec<Arc<dyn Dependent>>,
}

impl<T> Dispatch<T> {
    /// Deliver to every audience. A panicking listener is logged and the
    /// rest still run.
    pub(crate) fn deliver(self) {
        for listener in &self.change {
            isolate("reactive change listener", || listener(&self.old, &self.new));
        }
        for listener in &self.set {
            isolate("reactive set listener", || listener(&self.new));
        }
        for dependent in &self.dependents {
            isolate("derived value recompute", || dependent.recompute());
        }
    }
}
