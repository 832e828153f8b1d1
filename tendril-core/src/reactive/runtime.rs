//! Reactive Runtime
//!
//! The runtime is the explicit context every reactive operation goes
//! through. It owns:
//!
//! - the dependency store (object/field -> subscribed computations),
//! - the active computation stack of each thread,
//! - the deferred ("post") job queue.
//!
//! The runtime never owns a computation. Subscriber sets hold them weakly,
//! and a computation whose last handle is dropped stops being notified.
//!
//! # How It Works
//!
//! 1. An observable object calls [`Runtime::track`] on every read. If a
//!    computation is running, it is added to the field's subscriber set and
//!    the set is recorded in the computation's membership list.
//!
//! 2. On every write the object calls [`Runtime::trigger`]. The runtime
//!    snapshots the affected subscribers (plus the `ITERATE` subscribers for
//!    adds and deletes), drops the currently running computation, and
//!    notifies each one exactly once.
//!
//! 3. A notified computation either re-runs or hands itself to its
//!    scheduler. Re-running clears its memberships first, so the next
//!    dependency set is exactly what the new run reads.
//!
//! # Re-entrancy
//!
//! No lock is held while user code runs, so bodies, schedulers and
//! callbacks may read and write observed fields (and so call back into
//! `track`/`trigger`) freely.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::ComputationStack;
use super::effect::{Computation, EffectOptions};
use super::store::{DepStore, FieldKey, MutationKind, ObjectId, ITERATE};
use super::subscriber::{ComputationId, Subscriber};

/// A job waiting in the deferred queue.
pub type PostJob = Box<dyn FnOnce() + Send>;

/// Handle to a reactive runtime.
///
/// Cloning is cheap and yields another handle to the same runtime.
#[derive(Clone, Default)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Non-owning handle to a [`Runtime`].
///
/// Observed objects and computations hold the runtime weakly, so a runtime
/// is not kept alive by the objects and computations it tracks.
#[derive(Clone, Default)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

#[derive(Default)]
struct RuntimeInner {
    store: Mutex<DepStore>,
    stack: ComputationStack,
    post_queue: Mutex<VecDeque<PostJob>>,
}

impl Runtime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn stack(&self) -> &ComputationStack {
        &self.inner.stack
    }

    /// Create a computation over `body`.
    ///
    /// Unless `options.lazy` is set, the body runs once right away to
    /// establish its dependencies. The returned handle owns the computation:
    /// once every clone of it is dropped, writes no longer reach it.
    #[must_use = "dropping the computation stops it"]
    pub fn effect<T, F>(&self, body: F, options: EffectOptions<T>) -> Computation<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let lazy = options.lazy;
        let computation = Computation::new(self, body, options);
        if !lazy {
            computation.run();
        }
        computation
    }

    /// Subscribe the active computation to `(object, key)`.
    ///
    /// Does nothing when no computation is running.
    pub fn track(&self, object: ObjectId, key: impl Into<FieldKey>) {
        let Some(active) = self.inner.stack.current() else {
            return;
        };
        let key = key.into();

        let dep = self.inner.store.lock().dep_for(object, key.clone());
        let previous = dep.lock().insert(active.id(), Arc::downgrade(&active));
        if previous.is_none() {
            active.memberships().record(&dep);
            tracing::trace!(
                object = object.raw(),
                %key,
                computation = active.id().raw(),
                "tracked"
            );
        }
    }

    /// Notify every computation subscribed to `(object, key)`.
    ///
    /// `Add` and `Delete` also notify the object's `ITERATE` subscribers.
    /// Each computation is notified at most once, and never the one that is
    /// currently running. Computations whose handles are all gone are
    /// skipped. If a subscriber panics, the remaining subscribers are still
    /// notified and the first panic is then resumed here.
    pub fn trigger(&self, object: ObjectId, key: impl Into<FieldKey>, kind: MutationKind) {
        let key = key.into();

        let (exact, shape) = {
            let store = self.inner.store.lock();
            let shape = if kind.changes_shape() {
                store.get(object, &ITERATE)
            } else {
                None
            };
            (store.get(object, &key), shape)
        };

        let active = self.inner.stack.current_id();
        let mut pending: IndexMap<ComputationId, Arc<dyn Subscriber>> = IndexMap::new();
        for dep in [exact, shape].into_iter().flatten() {
            for (id, subscriber) in dep.lock().iter() {
                if Some(*id) == active || pending.contains_key(id) {
                    continue;
                }
                if let Some(subscriber) = subscriber.upgrade() {
                    pending.insert(*id, subscriber);
                }
            }
        }

        if pending.is_empty() {
            return;
        }

        tracing::trace!(
            object = object.raw(),
            %key,
            %kind,
            subscribers = pending.len(),
            "trigger"
        );

        let mut first_panic = None;
        for (id, subscriber) in pending {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber.notify()));
            if let Err(payload) = outcome {
                tracing::warn!(
                    computation = id.raw(),
                    %key,
                    "computation panicked during trigger"
                );
                first_panic.get_or_insert(payload);
            }
        }

        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// Drop every dependency entry recorded for `object`.
    ///
    /// Called when an observed object goes away.
    pub fn release(&self, object: ObjectId) {
        if self.inner.store.lock().release(object).is_some() {
            tracing::trace!(object = object.raw(), "released");
        }
    }

    /// Append a job to the deferred queue.
    pub fn queue_post_job(&self, job: impl FnOnce() + Send + 'static) {
        self.inner.post_queue.lock().push_back(Box::new(job));
    }

    /// Run deferred jobs in FIFO order until the queue is empty.
    ///
    /// Jobs queued while flushing run in the same flush. A panicking job
    /// does not stop the flush; the first panic is resumed once the queue
    /// is drained. Returns the number of jobs run.
    pub fn flush_post_jobs(&self) -> usize {
        let mut ran = 0;
        let mut first_panic = None;

        loop {
            let job = self.inner.post_queue.lock().pop_front();
            let Some(job) = job else {
                break;
            };
            ran += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                tracing::warn!("post job panicked");
                first_panic.get_or_insert(payload);
            }
        }

        if ran > 0 {
            tracing::debug!(jobs = ran, "flushed post jobs");
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
        ran
    }

    /// Number of jobs waiting in the deferred queue.
    pub fn pending_post_jobs(&self) -> usize {
        self.inner.post_queue.lock().len()
    }

    /// The computation currently running on this thread, if any.
    pub fn active_computation(&self) -> Option<ComputationId> {
        self.inner.stack.current_id()
    }

    /// Check if a computation is running on this thread, i.e. reads are
    /// being tracked.
    pub fn is_tracking(&self) -> bool {
        self.inner.stack.depth() > 0
    }

    /// Number of live computations subscribed to `(object, key)`.
    pub fn subscriber_count(&self, object: ObjectId, key: impl Into<FieldKey>) -> usize {
        let dep = self.inner.store.lock().get(object, &key.into());
        dep.as_ref().map_or(0, |dep| {
            dep.lock()
                .values()
                .filter(|subscriber| subscriber.strong_count() > 0)
                .count()
        })
    }

    /// Number of objects with at least one dependency entry.
    pub fn tracked_objects(&self) -> usize {
        self.inner.store.lock().object_count()
    }

    /// Number of keys (including `ITERATE`) with an entry for `object`.
    pub fn tracked_keys(&self, object: ObjectId) -> usize {
        self.inner.store.lock().key_count(object)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("tracked_objects", &self.tracked_objects())
            .field("stack_depth", &self.inner.stack.depth())
            .field("pending_post_jobs", &self.pending_post_jobs())
            .finish()
    }
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}
