//! Computation (Effect) Implementation
//!
//! A computation is a re-runnable body whose dependencies are whatever it
//! read during its latest run.
//!
//! # How Computations Work
//!
//! 1. Unless created lazily, the body runs once at creation to establish
//!    its initial dependencies.
//!
//! 2. When a field it read is written, the computation is notified. With a
//!    scheduler it is handed to the scheduler; otherwise it re-runs at once.
//!
//! 3. Every run first removes the computation from all dependency sets it
//!    belongs to, then tracks afresh. Fields that a run no longer reads
//!    therefore stop triggering it.
//!
//! 4. The [`Computation`] handles own it. Dependency sets only refer to it
//!    weakly, so dropping the last handle removes it from every set.
//!
//! # Schedulers
//!
//! A scheduler decouples "a dependency changed" from "run now". It receives
//! the computation and may run it, defer it, batch it, or ignore it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::{ComputationId, Memberships, Subscriber};

/// Hook deciding how and when a triggered computation re-runs.
pub type Scheduler<T> = Arc<dyn Fn(&Computation<T>) + Send + Sync>;

/// Options for [`Runtime::effect`].
pub struct EffectOptions<T> {
    /// Skip the initial run; the first [`Computation::run`] does it.
    pub lazy: bool,

    /// Called instead of re-running when a dependency changes.
    pub scheduler: Option<Scheduler<T>>,
}

impl<T> EffectOptions<T> {
    /// Options for a computation that does not run at creation.
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            scheduler: None,
        }
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_scheduler<S>(mut self, scheduler: S) -> Self
    where
        S: Fn(&Computation<T>) + Send + Sync + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }
}

impl<T> Default for EffectOptions<T> {
    fn default() -> Self {
        Self {
            lazy: false,
            scheduler: None,
        }
    }
}

impl<T> Clone for EffectOptions<T> {
    fn clone(&self) -> Self {
        Self {
            lazy: self.lazy,
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T> std::fmt::Debug for EffectOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// A re-runnable unit of work that re-runs when a field it read changes.
///
/// Clones share the same computation, which stays subscribed while any
/// clone is alive.
///
/// # Example
///
/// ```rust
/// use tendril_core::reactive::{EffectOptions, MutationKind, ObjectId, Runtime};
///
/// let rt = Runtime::new();
/// let object = ObjectId::new();
///
/// let tracker = rt.downgrade();
/// let effect = rt.effect(
///     move || {
///         if let Some(rt) = tracker.upgrade() {
///             rt.track(object, "count");
///         }
///     },
///     EffectOptions::default(),
/// );
/// assert_eq!(effect.run_count(), 1);
///
/// rt.trigger(object, "count", MutationKind::Set);
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Computation<T> {
    inner: Arc<ComputationInner<T>>,
}

struct ComputationInner<T> {
    id: ComputationId,
    runtime: WeakRuntime,
    body: Box<dyn Fn() -> T + Send + Sync>,
    scheduler: Option<Scheduler<T>>,
    lazy: bool,
    memberships: Memberships,
    run_count: AtomicUsize,
}

impl<T: 'static> Computation<T> {
    /// Create a computation without running it. [`Runtime::effect`] does
    /// the initial run.
    pub(crate) fn new<F>(runtime: &Runtime, body: F, options: EffectOptions<T>) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(ComputationInner {
            id: ComputationId::new(),
            runtime: runtime.downgrade(),
            body: Box::new(body),
            scheduler: options.scheduler,
            lazy: options.lazy,
            memberships: Memberships::default(),
            run_count: AtomicUsize::new(0),
        });
        tracing::debug!(
            computation = inner.id.raw(),
            lazy = inner.lazy,
            scheduled = inner.scheduler.is_some(),
            "created computation"
        );
        Self { inner }
    }

    /// Run the body and return its result.
    ///
    /// Clears the previous run's dependencies, then tracks the reads made by
    /// this run. Nested runs restore the outer computation afterwards.
    pub fn run(&self) -> T {
        self.inner.memberships.clear(self.inner.id);
        self.inner.run_count.fetch_add(1, Ordering::SeqCst);

        let Some(runtime) = self.inner.runtime.upgrade() else {
            // Without a runtime nothing can be tracked.
            return (self.inner.body)();
        };
        let subscriber: Arc<dyn Subscriber> = self.inner.clone();
        let _ctx = runtime.stack().enter(subscriber);

        (self.inner.body)()
    }
}

impl<T> Computation<T> {
    /// Get the computation's unique ID.
    pub fn id(&self) -> ComputationId {
        self.inner.id
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of dependency sets this computation currently belongs to.
    pub fn dependency_count(&self) -> usize {
        self.inner.memberships.len()
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    pub fn has_scheduler(&self) -> bool {
        self.inner.scheduler.is_some()
    }

    pub(crate) fn downgrade(&self) -> WeakComputation<T> {
        WeakComputation {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle, for work queued on behalf of a computation.
pub(crate) struct WeakComputation<T> {
    inner: Weak<ComputationInner<T>>,
}

impl<T> WeakComputation<T> {
    pub(crate) fn upgrade(&self) -> Option<Computation<T>> {
        self.inner.upgrade().map(|inner| Computation { inner })
    }
}

impl<T> Drop for ComputationInner<T> {
    fn drop(&mut self) {
        self.memberships.clear(self.id);
        tracing::trace!(computation = self.id.raw(), "dropped computation");
    }
}

impl<T: 'static> Subscriber for ComputationInner<T> {
    fn id(&self) -> ComputationId {
        self.id
    }

    fn memberships(&self) -> &Memberships {
        &self.memberships
    }

    fn notify(self: Arc<Self>) {
        let computation = Computation { inner: self };
        match computation.inner.scheduler.clone() {
            Some(scheduler) => scheduler(&computation),
            None => {
                computation.run();
            }
        }
    }
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Computation<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for Computation<T> {}

impl<T> std::fmt::Debug for Computation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("lazy", &self.inner.lazy)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{MutationKind, ObjectId};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let rt = Runtime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = rt.effect(
            move || {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions::default(),
        );

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn lazy_effect_runs_only_when_asked() {
        let rt = Runtime::new();
        let object = ObjectId::new();
        let tracker = rt.clone();

        let effect = rt.effect(
            move || {
                tracker.track(object, "foo");
                7
            },
            EffectOptions::lazy(),
        );

        assert!(effect.is_lazy());
        assert_eq!(effect.run_count(), 0);
        assert_eq!(effect.dependency_count(), 0);

        // Triggering before the first run reaches nobody.
        rt.trigger(object, "foo", MutationKind::Set);
        assert_eq!(effect.run_count(), 0);

        assert_eq!(effect.run(), 7);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn scheduler_replaces_direct_rerun() {
        let rt = Runtime::new();
        let object = ObjectId::new();
        let tracker = rt.clone();
        let scheduled = Arc::new(Mutex::new(Vec::new()));
        let scheduled_clone = scheduled.clone();

        let effect = rt.effect(
            move || tracker.track(object, "foo"),
            EffectOptions::default().with_scheduler(move |c: &Computation<()>| {
                scheduled_clone.lock().push(c.clone());
            }),
        );

        // The initial run is not routed through the scheduler.
        assert_eq!(effect.run_count(), 1);
        assert!(scheduled.lock().is_empty());

        rt.trigger(object, "foo", MutationKind::Set);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(*scheduled.lock(), vec![effect.clone()]);

        // The scheduler decides when to run.
        let queued = scheduled.lock().pop();
        if let Some(computation) = queued {
            computation.run();
        }
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn rerun_drops_stale_dependencies() {
        let rt = Runtime::new();
        let object = ObjectId::new();
        let use_foo = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let use_foo_clone = use_foo.clone();
        let tracker = rt.clone();

        let effect = rt.effect(
            move || {
                if use_foo_clone.load(Ordering::SeqCst) {
                    tracker.track(object, "foo");
                } else {
                    tracker.track(object, "bar");
                }
            },
            EffectOptions::default(),
        );
        assert_eq!(rt.subscriber_count(object, "foo"), 1);

        use_foo.store(false, Ordering::SeqCst);
        effect.run();
        assert_eq!(rt.subscriber_count(object, "foo"), 0);
        assert_eq!(rt.subscriber_count(object, "bar"), 1);
        assert_eq!(effect.dependency_count(), 1);

        rt.trigger(object, "foo", MutationKind::Set);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn nested_effects_track_into_their_own_sets() {
        let rt = Runtime::new();
        let object = ObjectId::new();
        let inner_slot: Arc<Mutex<Option<Computation<()>>>> = Arc::new(Mutex::new(None));

        let outer_rt = rt.clone();
        let slot = inner_slot.clone();
        let outer = rt.effect(
            move || {
                let inner_rt = outer_rt.clone();
                let inner = outer_rt.effect(
                    move || inner_rt.track(object, "inner"),
                    EffectOptions::default(),
                );
                *slot.lock() = Some(inner);
                outer_rt.track(object, "outer");
            },
            EffectOptions::default(),
        );

        assert_eq!(rt.subscriber_count(object, "outer"), 1);
        assert_eq!(rt.subscriber_count(object, "inner"), 1);
        assert_eq!(outer.dependency_count(), 1);
        assert!(rt.active_computation().is_none());

        let inner = inner_slot.lock().clone();
        assert_eq!(inner.map(|c| c.dependency_count()), Some(1));
    }

    #[test]
    fn self_trigger_does_not_recurse() {
        let rt = Runtime::new();
        let object = ObjectId::new();
        let tracker = rt.clone();

        let effect = rt.effect(
            move || {
                tracker.track(object, "count");
                tracker.trigger(object, "count", MutationKind::Set);
            },
            EffectOptions::default(),
        );

        assert_eq!(effect.run_count(), 1);
        rt.trigger(object, "count", MutationKind::Set);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn clone_shares_state() {
        let rt = Runtime::new();
        let effect1 = rt.effect(|| {}, EffectOptions::default());
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        effect1.run();
        assert_eq!(effect2.run_count(), 2);
    }

    #[test]
    fn dropping_the_last_handle_unsubscribes() {
        let rt = Runtime::new();
        let object = ObjectId::new();
        let tracker = rt.clone();

        let effect = rt.effect(move || tracker.track(object, "foo"), EffectOptions::default());
        let weak = effect.downgrade();
        assert_eq!(rt.subscriber_count(object, "foo"), 1);

        drop(effect);
        assert!(weak.upgrade().is_none());
        assert_eq!(rt.subscriber_count(object, "foo"), 0);

        // Nothing left to notify.
        rt.trigger(object, "foo", MutationKind::Set);
    }

    #[test]
    fn runs_untracked_after_runtime_is_gone() {
        let rt = Runtime::new();
        let effect = rt.effect(|| 1, EffectOptions::lazy());
        drop(rt);

        assert_eq!(effect.run(), 1);
        assert_eq!(effect.dependency_count(), 0);
    }
}
