//! Scheduler abstraction consumed by the Keepsake state store.
//!
//! The store never owns threads or timers itself. Everything that has to
//! happen "later", "periodically", or "off the main context" goes through
//! the [`Scheduler`] trait, which distinguishes two execution contexts:
//!
//! - **Main context**: the single logical thread on which entities are read
//!   and mutated. [`Scheduler::run_now`], [`Scheduler::run_after`] and
//!   [`Scheduler::run_periodic`] deliver work here.
//! - **Background context**: a pool for blocking I/O, reached with
//!   [`Scheduler::run_background`]. Results are marshalled back by calling
//!   `run_now` from the background task.
//!
//! # Hosts
//!
//! - [`TokioScheduler`] + [`MainLoop`] -- wall-clock host on a tokio runtime.
//! - [`ManualScheduler`] -- virtual clock advanced explicitly; suitable for
//!   tick-driven hosts and deterministic tests.
//!
//! Every submission returns a [`TaskHandle`]. Cancellation is idempotent and
//! best-effort: a task that already started is not rolled back.

pub mod guard;
pub mod handle;
pub mod manual;
pub mod runtime;

use std::time::Duration;

pub use guard::isolate;
pub use handle::TaskHandle;
pub use manual::ManualScheduler;
pub use runtime::{MainLoop, TokioScheduler};

/// A unit of work that runs once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work that runs on every period of a repeating schedule.
pub type RepeatingTask = Box<dyn FnMut() + Send + 'static>;

/// Smallest period accepted for repeating work. Shorter periods are clamped.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Submission interface for deferred and off-context work.
///
/// Implementations must be cheap to share (`Arc<dyn Scheduler>`) and must
/// never run main-context work concurrently with other main-context work.
pub trait Scheduler: Send + Sync {
    /// Run `task` on the main context as soon as possible.
    fn run_now(&self, task: Task) -> TaskHandle;

    /// Run `task` on the main context once `delay` has elapsed.
    fn run_after(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Run `task` on the main context after `delay`, then every `period`
    /// until the returned handle is cancelled.
    fn run_periodic(&self, delay: Duration, period: Duration, task: RepeatingTask) -> TaskHandle;

    /// Run `task` off the main context. The task may block.
    fn run_background(&self, task: Task) -> TaskHandle;
}
