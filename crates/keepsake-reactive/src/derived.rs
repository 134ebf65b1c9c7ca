//! Values computed from other values.
//!
//! A derived value is registered as a dependent on each of its sources and
//! recomputed after the source's listeners have run. Sources hold their
//! derived values strongly and derived values hold their sources weakly, so
//! a derived value lives as long as any source does unless it is destroyed.
//! Destroying a source destroys everything derived from it; destroying a
//! derived value unregisters it from every source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keepsake_sched::{Scheduler, TaskHandle};

use crate::dispatch::Dependent;
use crate::lock;
use crate::value::Reactive;

type Recompute<R> = Box<dyn Fn(&Reactive<R>) + Send + Sync>;

/// Graph node feeding one derived value.
struct Node<R> {
    target: Reactive<R>,
    recompute: Recompute<R>,
}

impl<R> Dependent for Node<R>
where
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn recompute(&self) {
        if !self.target.is_destroyed() {
            (self.recompute)(&self.target);
        }
    }

    fn destroy(&self) {
        self.target.destroy();
    }
}

/// Build the graph node that feeds `target`.
fn attach<R>(target: &Reactive<R>, recompute: Recompute<R>) -> Arc<dyn Dependent>
where
    R: Clone + PartialEq + Send + Sync + 'static,
{
    Arc::new(Node {
        target: target.clone(),
        recompute,
    })
}

/// Register `node` on `source`; `target` unregisters it when torn down.
/// A destroyed source destroys `target` straight away.
fn link<S, R>(source: &Reactive<S>, node: &Arc<dyn Dependent>, target: &Reactive<R>)
where
    S: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    let Some(id) = source.add_dependent(Arc::clone(node)) else {
        target.destroy();
        return;
    };
    let weak = source.downgrade();
    target.add_teardown(Box::new(move || {
        if let Some(source) = Reactive::upgrade(&weak) {
            source.remove_dependent(id);
        }
    }));
}

/// Cancel whatever timer is parked in `slot` when `target` is torn down.
fn cancel_on_teardown<R>(target: &Reactive<R>, slot: &Arc<Mutex<Option<TaskHandle>>>)
where
    R: Clone + PartialEq + Send + Sync + 'static,
{
    let slot = Arc::clone(slot);
    target.add_teardown(Box::new(move || {
        let pending = lock(&slot).take();
        if let Some(pending) = pending {
            pending.cancel();
        }
    }));
}

impl<T> Reactive<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// A value holding `f(current)`, recomputed whenever this value changes.
    pub fn map<R>(&self, f: impl Fn(&T) -> R + Send + Sync + 'static) -> Reactive<R>
    where
        R: Clone + PartialEq + Send + Sync + 'static,
    {
        let target = Reactive::new(f(&self.get()));
        let source = self.downgrade();
        let node = attach(
            &target,
            Box::new(move |out: &Reactive<R>| {
                if let Some(source) = Reactive::upgrade(&source) {
                    out.set(f(&source.get()));
                }
            }),
        );
        link(self, &node, &target);
        target
    }

    /// A value holding `f(a, b)`, recomputed whenever either source changes.
    pub fn combine<A, B>(
        a: &Reactive<A>,
        b: &Reactive<B>,
        f: impl Fn(&A, &B) -> T + Send + Sync + 'static,
    ) -> Self
    where
        A: Clone + PartialEq + Send + Sync + 'static,
        B: Clone + PartialEq + Send + Sync + 'static,
    {
        let target = Self::new(f(&a.get(), &b.get()));
        let (weak_a, weak_b) = (a.downgrade(), b.downgrade());
        let node = attach(
            &target,
            Box::new(move |out: &Self| {
                if let (Some(a), Some(b)) = (Reactive::upgrade(&weak_a), Reactive::upgrade(&weak_b)) {
                    out.set(f(&a.get(), &b.get()));
                }
            }),
        );
        link(a, &node, &target);
        link(b, &node, &target);
        target
    }

    /// A mirror that only accepts writes differing from the last value it
    /// forwarded, so its version tracks real changes only.
    pub fn distinct_until_changed(&self) -> Self {
        let target = Self::new(self.get());
        let last = Mutex::new(self.get());
        let source = self.downgrade();
        let node = attach(
            &target,
            Box::new(move |out: &Self| {
                let Some(source) = Self::upgrade(&source) else {
                    return;
                };
                let next = source.get();
                let mut seen = lock(&last);
                if *seen == next {
                    return;
                }
                *seen = next.clone();
                drop(seen);
                out.set(next);
            }),
        );
        link(self, &node, &target);
        target
    }

    /// A mirror that forwards a change immediately, then ignores further
    /// changes until `period` has elapsed on `scheduler`.
    pub fn throttle(&self, period: Duration, scheduler: &Arc<dyn Scheduler>) -> Self {
        let target = Self::new(self.get());
        let cooling = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(Mutex::new(None::<TaskHandle>));
        let source = self.downgrade();
        let scheduler = Arc::clone(scheduler);
        let slot = Arc::clone(&pending);
        let node = attach(
            &target,
            Box::new(move |out: &Self| {
                if cooling
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return;
                }
                let Some(source) = Self::upgrade(&source) else {
                    return;
                };
                out.set(source.get());
                let reset = Arc::clone(&cooling);
                let handle = scheduler.run_after(
                    period,
                    Box::new(move || reset.store(false, Ordering::Release)),
                );
                *lock(&slot) = Some(handle);
            }),
        );
        link(self, &node, &target);
        cancel_on_teardown(&target, &pending);
        target
    }

    /// A mirror that forwards the latest value only once no change has
    /// arrived for `period`. Each change cancels the forward already
    /// scheduled.
    pub fn debounce(&self, period: Duration, scheduler: &Arc<dyn Scheduler>) -> Self {
        let target = Self::new(self.get());
        let pending = Arc::new(Mutex::new(None::<TaskHandle>));
        let source = self.downgrade();
        let scheduler = Arc::clone(scheduler);
        let slot = Arc::clone(&pending);
        let node = attach(
            &target,
            Box::new(move |out: &Self| {
                let Some(source) = Self::upgrade(&source) else {
                    return;
                };
                let next = source.get();
                let out = out.downgrade();
                let handle = scheduler.run_after(
                    period,
                    Box::new(move || {
                        if let Some(out) = Self::upgrade(&out) {
                            out.set(next);
                        }
                    }),
                );
                let previous = lock(&slot).replace(handle);
                if let Some(previous) = previous {
                    previous.cancel();
                }
            }),
        );
        link(self, &node, &target);
        cancel_on_teardown(&target, &pending);
        target
    }

    /// A value starting at `default`, set to `loader()` once it completes.
    ///
    /// `loader` runs on the background context; the result is applied on
    /// the main context.
    pub fn compute_async(
        default: T,
        scheduler: &Arc<dyn Scheduler>,
        loader: impl FnOnce() -> T + Send + 'static,
    ) -> Self {
        let value = Self::new(default);
        value.refresh_async(scheduler, loader);
        value
    }

    /// Run `loader` on the background context and set its result on the
    /// main context.
    pub fn refresh_async(
        &self,
        scheduler: &Arc<dyn Scheduler>,
        loader: impl FnOnce() -> T + Send + 'static,
    ) -> TaskHandle {
        let target = self.clone();
        let marshal = Arc::clone(scheduler);
        scheduler.run_background(Box::new(move || {
            let next = loader();
            marshal.run_now(Box::new(move || target.set(next)));
        }))
    }
}

#[cfg(test)]
mod tests {
    use keepsake_sched::ManualScheduler;

    use super::*;

    fn manual() -> (Arc<ManualScheduler>, Arc<dyn Scheduler>) {
        let manual = Arc::new(ManualScheduler::new());
        let scheduler: Arc<dyn Scheduler> = Arc::clone(&manual) as Arc<dyn Scheduler>;
        (manual, scheduler)
    }

    #[test]
    fn map_tracks_source() {
        let coins = Reactive::new(10_u32);
        let label = coins.map(|c| format!("{c} coins"));
        assert_eq!(label.get(), "10 coins");

        coins.set(25);
        assert_eq!(label.get(), "25 coins");
    }

    #[test]
    fn combine_recomputes_from_either_side() {
        let a = Reactive::new(2_i32);
        let b = Reactive::new(3_i32);
        let product = Reactive::combine(&a, &b, |x, y| x.saturating_mul(*y));
        assert_eq!(product.get(), 6);

        a.set(4);
        assert_eq!(product.get(), 12);
        b.set(5);
        assert_eq!(product.get(), 20);
    }

    #[test]
    fn destroying_derived_unregisters_from_sources() {
        let a = Reactive::new(1_u8);
        let b = Reactive::new(1_u8);
        let sum = Reactive::combine(&a, &b, |x, y| x.saturating_add(*y));
        assert_eq!(a.dependent_count(), 1);
        assert_eq!(b.dependent_count(), 1);

        sum.destroy();

        assert_eq!(a.dependent_count(), 0);
        assert_eq!(b.dependent_count(), 0);
        assert!(!a.is_destroyed());
    }

    #[test]
    fn destroying_source_cascades() {
        let source = Reactive::new(1_u32);
        let doubled = source.map(|v| v.saturating_mul(2));
        let quadrupled = doubled.map(|v| v.saturating_mul(2));

        source.destroy();

        assert!(doubled.is_destroyed());
        assert!(quadrupled.is_destroyed());
    }

    #[test]
    fn map_of_destroyed_source_is_destroyed() {
        let source = Reactive::new(1_u32);
        source.destroy();
        let mapped = source.map(|v| v.saturating_add(1));
        assert!(mapped.is_destroyed());
        assert_eq!(mapped.get(), 2);
    }

    #[test]
    fn distinct_version_tracks_changes_only() {
        let source = Reactive::new(1_u32);
        let distinct = source.distinct_until_changed();

        source.set(1);
        source.set(2);
        source.set(2);
        source.set(3);

        assert_eq!(distinct.get(), 3);
        assert_eq!(distinct.version(), 2);
        assert_eq!(source.version(), 4);
    }

    #[test]
    fn throttle_forwards_first_change_per_window() {
        let (manual, scheduler) = manual();
        let source = Reactive::new(0_u32);
        let throttled = source.throttle(Duration::from_secs(1), &scheduler);

        source.set(1);
        source.set(2);
        assert_eq!(throttled.get(), 1);

        manual.advance(Duration::from_secs(1));
        source.set(3);
        assert_eq!(throttled.get(), 3);
    }

    #[test]
    fn debounce_forwards_last_of_burst() {
        let (manual, scheduler) = manual();
        let source = Reactive::new(0_u32);
        let debounced = source.debounce(Duration::from_millis(500), &scheduler);

        source.set(1);
        manual.advance(Duration::from_millis(300));
        source.set(2);
        manual.advance(Duration::from_millis(300));
        assert_eq!(debounced.get(), 0);

        manual.advance(Duration::from_millis(200));
        assert_eq!(debounced.get(), 2);
        assert_eq!(debounced.version(), 1);
    }

    #[test]
    fn destroyed_debounce_cancels_pending_forward() {
        let (manual, scheduler) = manual();
        let source = Reactive::new(0_u32);
        let debounced = source.debounce(Duration::from_millis(100), &scheduler);

        source.set(7);
        debounced.destroy();
        manual.advance(Duration::from_secs(1));

        assert_eq!(debounced.get(), 0);
        assert_eq!(source.dependent_count(), 0);
    }

    #[test]
    fn compute_async_applies_on_main_context() {
        let (manual, scheduler) = manual();
        let value = Reactive::compute_async(0_u64, &scheduler, || 99);
        assert_eq!(value.get(), 0);

        manual.run_pending();
        assert_eq!(value.get(), 99);
    }
}
