//! Active Computation Context
//!
//! Tracks which computation is currently running. When a field is read,
//! the top of this stack is the computation that gets subscribed.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns one stack per thread, so threads
//! sharing a runtime never see each other's computations. Running a
//! computation pushes it and returns a guard; dropping the guard pops it
//! again, so the previous computation becomes current. This supports nested
//! computations (an effect that creates or runs another effect) and keeps
//! the stack consistent when a body panics.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::subscriber::{ComputationId, Subscriber};

type Entries = Vec<Arc<dyn Subscriber>>;

/// The computations currently executing, per thread.
#[derive(Default)]
pub(crate) struct ComputationStack {
    threads: Mutex<HashMap<ThreadId, Entries>>,
}

impl ComputationStack {
    /// Push `subscriber` on the calling thread's stack and make it the
    /// active computation until the returned guard is dropped.
    pub(crate) fn enter(&self, subscriber: Arc<dyn Subscriber>) -> ContextGuard<'_> {
        let id = subscriber.id();
        self.threads
            .lock()
            .entry(thread::current().id())
            .or_default()
            .push(subscriber);
        ContextGuard { stack: self, id }
    }

    /// The active computation on the calling thread, if any.
    pub(crate) fn current(&self) -> Option<Arc<dyn Subscriber>> {
        self.with_entries(|entries| entries.last().cloned())
    }

    pub(crate) fn current_id(&self) -> Option<ComputationId> {
        self.with_entries(|entries| entries.last().map(|entry| entry.id()))
    }

    /// Nesting depth on the calling thread.
    pub(crate) fn depth(&self) -> usize {
        self.with_entries(|entries| Some(entries.len())).unwrap_or(0)
    }

    fn with_entries<R>(&self, f: impl FnOnce(&Entries) -> Option<R>) -> Option<R> {
        self.threads.lock().get(&thread::current().id()).and_then(f)
    }

    fn pop(&self) -> Option<Arc<dyn Subscriber>> {
        let thread = thread::current().id();
        let mut threads = self.threads.lock();
        let entries = threads.get_mut(&thread)?;
        let popped = entries.pop();
        if entries.is_empty() {
            threads.remove(&thread);
        }
        popped
    }
}

/// Guard that pops the stack when dropped.
pub(crate) struct ContextGuard<'a> {
    stack: &'a ComputationStack,
    id: ComputationId,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        // The popped entry may be the last handle to its computation, so it
        // is dropped after the stack lock is released.
        let popped = self.stack.pop();

        // Guards are strictly nested per thread, so the top must be ours.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.id(),
                self.id,
                "computation stack mismatch: expected {:?}, got {:?}",
                self.id,
                entry.id()
            );
        }
    }
}
