//! Panic isolation for callbacks.
//!
//! Listener and task panics must never unwind into the code that triggered
//! them. [`isolate`] runs a closure, catches any panic, and logs it.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Run `f`, catching and logging a panic instead of propagating it.
///
/// `context` names the kind of callback for the log line. Returns `true`
/// when `f` completed normally.
pub fn isolate<F: FnOnce()>(context: &'static str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                context,
                panic = panic_message(payload.as_ref()),
                "callback panicked; continuing"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_closure_reports_true() {
        let mut ran = false;
        assert!(isolate("test", || ran = true));
        assert!(ran);
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_closure_is_contained() {
        let ok = isolate("test", || panic!("boom"));
        assert!(!ok);
    }

    #[test]
    fn panic_message_reads_both_string_kinds() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
