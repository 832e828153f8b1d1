//! Subscriber types for the reactive system.
//!
//! A subscriber is anything that can sit in a dependency set and be
//! re-invoked by a trigger. Today that is only [`Computation`], but the
//! dependency store and dispatcher only ever see the [`Subscriber`] seam.
//!
//! [`Computation`]: super::Computation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::store::{Dep, WeakDep};

/// Unique identifier for a computation.
///
/// Used as the key inside dependency sets and to recognise the currently
/// active computation during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationId(u64);

impl ComputationId {
    /// Generate a new unique computation ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ComputationId {
    fn default() -> Self {
        Self::new()
    }
}

/// The dispatcher's view of a computation.
pub(crate) trait Subscriber: Send + Sync {
    fn id(&self) -> ComputationId;

    /// The dependency sets this subscriber currently belongs to.
    fn memberships(&self) -> &Memberships;

    /// Called by `trigger`: hand off to the scheduler, or re-run directly.
    fn notify(self: Arc<Self>);
}

/// Back-references from a computation to the dependency sets holding it.
///
/// The sets are held weakly; the store owns them, and releasing an object
/// must be able to free its sets even while computations still list them.
#[derive(Default)]
pub(crate) struct Memberships {
    sets: Mutex<SmallVec<[WeakDep; 4]>>,
}

impl Memberships {
    pub(crate) fn record(&self, dep: &Dep) {
        self.sets.lock().push(Arc::downgrade(dep));
    }

    /// Remove `id` from every set it belongs to and forget the sets.
    pub(crate) fn clear(&self, id: ComputationId) {
        let sets = std::mem::take(&mut *self.sets.lock());
        for weak in sets {
            if let Some(dep) = weak.upgrade() {
                dep.lock().shift_remove(&id);
            }
        }
    }

    /// Number of live sets.
    pub(crate) fn len(&self) -> usize {
        self.sets
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
