//! Cancellable handles for scheduled work.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type CancelHook = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a piece of scheduled work.
///
/// Cloning yields another handle to the same work. [`cancel`](Self::cancel)
/// is idempotent: the first call marks the work cancelled and runs the
/// host's cancel hook (e.g. aborting a timer task); later calls do nothing.
/// Work that already started is not interrupted.
#[derive(Clone, Default)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

#[derive(Default)]
struct HandleInner {
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<CancelHook>>,
}

impl TaskHandle {
    /// Create a live (not cancelled) handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the work. Safe to call any number of times.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self
            .inner
            .on_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Attach a hook that runs on the first cancellation.
    ///
    /// Runs immediately when the handle is already cancelled. A second hook
    /// replaces the first.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        if self.is_cancelled() {
            hook();
            return;
        }
        *self
            .inner
            .on_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
        // A cancel racing with registration may have missed the hook.
        if self.is_cancelled() {
            let hook = self
                .inner
                .on_cancel
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(hook) = hook {
                hook();
            }
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn new_handle_is_live() {
        assert!(!TaskHandle::new().is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent_and_runs_hook_once() {
        let handle = TaskHandle::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        handle.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.cancel();
        handle.cancel();
        handle.clone().cancel();

        assert!(handle.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hook_registered_after_cancel_runs_immediately() {
        let handle = TaskHandle::new();
        handle.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        handle.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
