//! Deterministic scheduler driven by an explicit virtual clock.
//!
//! [`ManualScheduler`] never runs anything on its own. The host (a game
//! tick, a test) calls [`advance`](ManualScheduler::advance) to move the
//! virtual clock and [`run_pending`](ManualScheduler::run_pending) to drain
//! queued work. Main-context and background work run on the calling thread,
//! which makes every interleaving reproducible.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::guard::isolate;
use crate::handle::TaskHandle;
use crate::{MIN_PERIOD, RepeatingTask, Scheduler, Task};

/// Scheduler with a virtual clock, advanced by the host.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    /// Virtual time elapsed since construction.
    now: Duration,
    /// Insertion counter, used to order timers due at the same instant.
    seq: u64,
    /// Work queued for the main context.
    main: VecDeque<Queued>,
    /// Work queued for the background context.
    background: VecDeque<Queued>,
    /// Pending delayed and repeating work.
    timers: Vec<Timer>,
}

struct Queued {
    handle: TaskHandle,
    task: Task,
}

enum TimerTask {
    Once(Task),
    Repeat {
        task: Arc<Mutex<RepeatingTask>>,
        period: Duration,
    },
}

struct Timer {
    due: Duration,
    seq: u64,
    handle: TaskHandle,
    task: TimerTask,
}

impl ManualScheduler {
    /// Create a scheduler with its clock at zero and nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since construction.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of queued main-context and background tasks.
    pub fn pending_tasks(&self) -> usize {
        let state = self.lock();
        state.main.len().saturating_add(state.background.len())
    }

    /// Number of timers that have not fired (or, for repeating timers, are
    /// still armed). Cancelled timers count until their due time passes.
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }

    /// Drain queued main-context and background work, including work queued
    /// by the tasks being drained. Returns the number of tasks that ran.
    ///
    /// Main-context work is preferred over background work at each step.
    pub fn run_pending(&self) -> usize {
        let mut ran: usize = 0;
        loop {
            let next = {
                let mut state = self.lock();
                state
                    .main
                    .pop_front()
                    .or_else(|| state.background.pop_front())
            };
            let Some(queued) = next else {
                break;
            };
            if queued.handle.is_cancelled() {
                continue;
            }
            isolate("manual scheduler task", queued.task);
            ran = ran.saturating_add(1);
        }
        ran
    }

    /// Move the virtual clock forward by `by`, firing every timer that
    /// becomes due (in due order) and draining the work each one queues.
    /// Returns the number of tasks that ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now.saturating_add(by);
        let mut ran = self.run_pending();

        while let Some(timer) = self.pop_due_timer(target) {
            if timer.handle.is_cancelled() {
                continue;
            }
            {
                let mut state = self.lock();
                state.now = timer.due;
                match timer.task {
                    TimerTask::Once(task) => state.main.push_back(Queued {
                        handle: timer.handle,
                        task,
                    }),
                    TimerTask::Repeat { task, period } => {
                        let shared = Arc::clone(&task);
                        state.main.push_back(Queued {
                            handle: timer.handle.clone(),
                            task: Box::new(move || {
                                let mut repeating =
                                    shared.lock().unwrap_or_else(PoisonError::into_inner);
                                (*repeating)();
                            }),
                        });
                        let seq = state.next_seq();
                        state.timers.push(Timer {
                            due: timer.due.saturating_add(period),
                            seq,
                            handle: timer.handle,
                            task: TimerTask::Repeat { task, period },
                        });
                    }
                }
            }
            ran = ran.saturating_add(self.run_pending());
        }

        self.lock().now = target;
        ran.saturating_add(self.run_pending())
    }

    fn pop_due_timer(&self, target: Duration) -> Option<Timer> {
        let mut state = self.lock();
        let position = state
            .timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due <= target)
            .min_by_key(|(_, timer)| (timer.due, timer.seq))
            .map(|(index, _)| index)?;
        Some(state.timers.swap_remove(position))
    }

    fn push_timer(&self, delay: Duration, task: TimerTask) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut state = self.lock();
        let due = state.now.saturating_add(delay);
        let seq = state.next_seq();
        state.timers.push(Timer {
            due,
            seq,
            handle: handle.clone(),
            task,
        });
        handle
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ManualState {
    const fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }
}

impl Scheduler for ManualScheduler {
    fn run_now(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        self.lock().main.push_back(Queued {
            handle: handle.clone(),
            task,
        });
        handle
    }

    fn run_after(&self, delay: Duration, task: Task) -> TaskHandle {
        self.push_timer(delay, TimerTask::Once(task))
    }

    fn run_periodic(&self, delay: Duration, period: Duration, task: RepeatingTask) -> TaskHandle {
        self.push_timer(
            delay,
            TimerTask::Repeat {
                task: Arc::new(Mutex::new(task)),
                period: period.max(MIN_PERIOD),
            },
        )
    }

    fn run_background(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        self.lock().background.push_back(Queued {
            handle: handle.clone(),
            task,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let read = Arc::clone(&count);
        (count, move || read.load(Ordering::SeqCst))
    }

    #[test]
    fn run_now_waits_for_run_pending() {
        let scheduler = ManualScheduler::new();
        let (count, read) = counter();
        scheduler.run_now(Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(read(), 0);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(read(), 1);
    }

    #[test]
    fn run_after_fires_only_once_due() {
        let scheduler = ManualScheduler::new();
        let (count, read) = counter();
        scheduler.run_after(
            Duration::from_secs(5),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );

        scheduler.advance(Duration::from_secs(4));
        assert_eq!(read(), 0);
        scheduler.advance(Duration::from_secs(1));
        assert_eq!(read(), 1);
        assert_eq!(scheduler.now(), Duration::from_secs(5));
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let scheduler = ManualScheduler::new();
        let (count, read) = counter();
        let handle = scheduler.run_after(
            Duration::from_secs(1),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        scheduler.advance(Duration::from_secs(10));
        assert_eq!(read(), 0);
    }

    #[test]
    fn periodic_repeats_until_cancelled() {
        let scheduler = ManualScheduler::new();
        let (count, read) = counter();
        let handle = scheduler.run_periodic(
            Duration::from_secs(2),
            Duration::from_secs(3),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );

        scheduler.advance(Duration::from_secs(2));
        assert_eq!(read(), 1);
        scheduler.advance(Duration::from_secs(6));
        assert_eq!(read(), 3);

        handle.cancel();
        scheduler.advance(Duration::from_secs(30));
        assert_eq!(read(), 3);
    }

    #[test]
    fn background_work_runs_and_can_marshal_back() {
        let scheduler = Arc::new(ManualScheduler::new());
        let (count, read) = counter();
        let inner = Arc::clone(&scheduler);
        scheduler.run_background(Box::new(move || {
            inner.run_now(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(scheduler.run_pending(), 2);
        assert_eq!(read(), 1);
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_task_does_not_stop_the_queue() {
        let scheduler = ManualScheduler::new();
        let (count, read) = counter();
        scheduler.run_now(Box::new(|| panic!("task failure")));
        scheduler.run_now(Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        }));

        scheduler.run_pending();
        assert_eq!(read(), 1);
    }

    #[test]
    fn timers_due_together_fire_in_submission_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            scheduler.run_after(
                Duration::from_secs(1),
                Box::new(move || {
                    order
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(label);
                }),
            );
        }
        scheduler.advance(Duration::from_secs(1));
        let order = order.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(order.as_slice(), ["a", "b", "c"]);
    }
}
