//! Serial I/O lane.
//!
//! Each manager owns one lane. Jobs run one at a time, in submission order,
//! on the scheduler's background context. Blocking callers can jump in with
//! [`IoLane::run_exclusive`], which first drains whatever is queued so
//! their operation lands after every earlier job. Nothing ever writes
//! around the lane, so a later job can never be overtaken by an earlier one.

use std::collections::VecDeque;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use keepsake_sched::{Scheduler, Task, isolate};

use crate::lock;

/// Poll interval while waiting for a busy lane.
const BUSY_WAIT: Duration = Duration::from_millis(1);

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Task>,
    /// A background drain has been requested and not yet found the queue
    /// empty.
    scheduled: bool,
}

pub(crate) struct IoLane {
    scheduler: Arc<dyn Scheduler>,
    queue: Mutex<Queue>,
    /// Held while a job runs. Jobs are popped only under this lock, which
    /// keeps them in order even when two drains overlap.
    exec: Mutex<()>,
}

impl IoLane {
    pub(crate) fn new(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            queue: Mutex::new(Queue::default()),
            exec: Mutex::new(()),
        })
    }

    /// Queue `job` behind everything already submitted.
    pub(crate) fn submit(self: &Arc<Self>, job: Task) {
        let needs_drain = {
            let mut queue = lock(&self.queue);
            queue.jobs.push_back(job);
            !std::mem::replace(&mut queue.scheduled, true)
        };
        if needs_drain {
            let lane = Arc::clone(self);
            self.scheduler.run_background(Box::new(move || lane.drain()));
        }
    }

    /// Number of jobs waiting to run.
    pub(crate) fn pending(&self) -> usize {
        lock(&self.queue).jobs.len()
    }

    /// Drain queued jobs, then run `op` before any job submitted later.
    pub(crate) fn run_exclusive<R>(&self, op: impl FnOnce() -> R) -> R {
        let guard = lock(&self.exec);
        self.drain_held(&guard);
        op()
    }

    /// Queue `op` behind every submitted job and wait up to `timeout` for
    /// it to finish. An idle lane runs it on the calling thread.
    ///
    /// Returns `None` when `op` has not finished by the deadline. It stays
    /// queued and still runs, in order, once the jobs ahead of it are done.
    pub(crate) fn run_queued_within<R: Send + 'static>(
        self: &Arc<Self>,
        timeout: Duration,
        op: impl FnOnce() -> R + Send + 'static,
    ) -> Option<R> {
        let (tx, rx) = mpsc::channel();
        self.submit(Box::new(move || {
            if tx.send(op()).is_err() {
                tracing::debug!("queued lane job finished after its caller stopped waiting");
            }
        }));

        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.exec.try_lock() {
                Ok(guard) => self.drain_held(&guard),
                Err(TryLockError::Poisoned(poisoned)) => self.drain_held(&poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            match rx.try_recv() {
                Ok(result) => return Some(result),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return None;
            }
            thread::sleep(BUSY_WAIT);
        }
    }

    fn drain(&self) {
        let guard = lock(&self.exec);
        self.drain_held(&guard);
    }

    fn drain_held(&self, _exec: &MutexGuard<'_, ()>) {
        loop {
            let job = {
                let mut queue = lock(&self.queue);
                let Some(job) = queue.jobs.pop_front() else {
                    queue.scheduled = false;
                    return;
                };
                job
            };
            isolate("state io job", job);
        }
    }
}
