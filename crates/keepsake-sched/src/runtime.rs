//! Wall-clock scheduler on a tokio runtime.
//!
//! The main context is a single [`MainLoop`] task that executes submitted
//! work one job at a time, in submission order. Timers are tokio tasks that
//! sleep and then forward their work to the main loop. Background work runs
//! on tokio's blocking pool via `spawn_blocking`.
//!
//! ```text
//! run_now ──────────────┐
//! run_after ── sleep ───┤
//! run_periodic ─ tick ──┼──> mpsc ──> MainLoop::run (main context)
//!                       │
//! run_background ───────┴──> spawn_blocking (background context)
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::guard::isolate;
use crate::handle::TaskHandle;
use crate::{MIN_PERIOD, RepeatingTask, Scheduler, Task};

/// Work travelling to the main loop together with its handle.
struct Queued {
    handle: TaskHandle,
    task: Task,
}

impl Queued {
    fn run(self) {
        if !self.handle.is_cancelled() {
            isolate("main loop task", self.task);
        }
    }
}

/// Scheduler backed by a tokio runtime.
///
/// Cheap to clone; all clones feed the same [`MainLoop`].
#[derive(Clone)]
pub struct TokioScheduler {
    runtime: Handle,
    main_tx: mpsc::UnboundedSender<Queued>,
}

/// The main execution context of a [`TokioScheduler`].
///
/// Exactly one exists per scheduler. Drive it with [`run`](Self::run) on a
/// dedicated task, or poll it with [`run_pending`](Self::run_pending) from a
/// host loop.
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Queued>,
}

impl TokioScheduler {
    /// Create a scheduler on `runtime` and the main loop it feeds.
    pub fn new(runtime: Handle) -> (Self, MainLoop) {
        let (main_tx, rx) = mpsc::unbounded_channel();
        (Self { runtime, main_tx }, MainLoop { rx })
    }

    /// Create a scheduler on the runtime of the calling task.
    ///
    /// Returns `None` outside a tokio runtime.
    pub fn from_current() -> Option<(Self, MainLoop)> {
        Handle::try_current().ok().map(Self::new)
    }

    fn send_main(tx: &mpsc::UnboundedSender<Queued>, handle: TaskHandle, task: Task) -> bool {
        let sent = tx.send(Queued { handle, task }).is_ok();
        if !sent {
            tracing::debug!("main loop closed; dropping scheduled task");
        }
        sent
    }
}

impl Scheduler for TokioScheduler {
    fn run_now(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        Self::send_main(&self.main_tx, handle.clone(), task);
        handle
    }

    fn run_after(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let timer_handle = handle.clone();
        let tx = self.main_tx.clone();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !timer_handle.is_cancelled() {
                Self::send_main(&tx, timer_handle, task);
            }
        });
        let abort = join.abort_handle();
        handle.on_cancel(move || abort.abort());
        handle
    }

    fn run_periodic(&self, delay: Duration, period: Duration, task: RepeatingTask) -> TaskHandle {
        let handle = TaskHandle::new();
        let timer_handle = handle.clone();
        let tx = self.main_tx.clone();
        let shared = Arc::new(Mutex::new(task));
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if timer_handle.is_cancelled() {
                    break;
                }
                let task = Arc::clone(&shared);
                let job: Task = Box::new(move || {
                    let mut repeating = task.lock().unwrap_or_else(PoisonError::into_inner);
                    (*repeating)();
                });
                if !Self::send_main(&tx, timer_handle.clone(), job) {
                    break;
                }
            }
        });
        let abort = join.abort_handle();
        handle.on_cancel(move || abort.abort());
        handle
    }

    fn run_background(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let worker_handle = handle.clone();
        // The blocking pool cannot abort a running closure; cancellation is
        // honoured only before it starts.
        drop(self.runtime.spawn_blocking(move || {
            if !worker_handle.is_cancelled() {
                isolate("background task", task);
            }
        }));
        handle
    }
}

impl MainLoop {
    /// Execute main-context work until every scheduler clone is dropped.
    pub async fn run(mut self) {
        while let Some(queued) = self.rx.recv().await {
            queued.run();
        }
        tracing::debug!("main loop finished: all schedulers dropped");
    }

    /// Execute every job already queued, without waiting for more.
    /// Returns the number of jobs taken off the queue.
    pub fn run_pending(&mut self) -> usize {
        let mut taken: usize = 0;
        while let Ok(queued) = self.rx.try_recv() {
            queued.run();
            taken = taken.saturating_add(1);
        }
        taken
    }

    /// Wait for the next job and execute it. Returns `false` once every
    /// scheduler clone has been dropped.
    pub async fn run_one(&mut self) -> bool {
        match self.rx.recv().await {
            Some(queued) => {
                queued.run();
                true
            }
            None => false,
        }
    }
}
