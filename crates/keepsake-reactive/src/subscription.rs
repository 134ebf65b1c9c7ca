//! Disposable subscription handles.

use std::fmt;
use std::sync::Mutex;

use crate::lock;

type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one registered listener.
///
/// [`unsubscribe`](Self::unsubscribe) removes exactly that listener and is
/// idempotent. Dropping the handle does **not** unsubscribe: listeners
/// registered for the lifetime of their source can discard it.
pub struct Subscription {
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    /// Create a handle that runs `unsubscribe` on first disposal.
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Mutex::new(Some(Box::new(unsubscribe))),
        }
    }

    /// A handle that is already disposed; returned when subscribing to a
    /// destroyed source.
    pub const fn inert() -> Self {
        Self {
            unsubscribe: Mutex::new(None),
        }
    }

    /// Remove the listener. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let action = lock(&self.unsubscribe).take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether the listener is still registered through this handle.
    pub fn is_active(&self) -> bool {
        lock(&self.unsubscribe).is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
