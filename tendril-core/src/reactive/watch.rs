//! Watchers
//!
//! A watcher observes a derived value and calls back with the new and the
//! previous value whenever one of the value's dependencies is written.
//!
//! # How Watchers Work
//!
//! 1. The source becomes a getter: either a user closure, or a deep
//!    traversal of a value (so every reachable field is a dependency).
//!
//! 2. The getter runs inside a lazy [`Computation`] whose scheduler is the
//!    watcher's job: re-run the getter, invalidate the previous run, call
//!    back, remember the new value.
//!
//! 3. With [`Flush::Sync`] the job runs inside the write that caused it.
//!    With [`Flush::Post`] it is queued on the runtime and runs on the next
//!    [`Runtime::flush_post_jobs`].
//!
//! 4. [`Runtime::watch`] returns a [`WatchHandle`] owning the computation.
//!    Dropping it stops the watcher, including jobs it already queued.
//!
//! # Invalidation
//!
//! The callback receives an [`OnInvalidate`] handle. A cleanup registered
//! there runs right before the next callback, which lets a run cancel work
//! that a newer run has made obsolete (a request in flight, a timer).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::effect::{Computation, EffectOptions};
use super::subscriber::ComputationId;
use super::runtime::Runtime;
use super::traverse::{traverse, Traverse};
use crate::error::Error;

/// When a triggered watcher job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Flush {
    /// Inside the triggering write.
    #[default]
    Sync,

    /// On the runtime's deferred queue, after the current unit of work.
    Post,
}

impl FromStr for Flush {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "post" => Ok(Self::Post),
            _ => Err(Error::UnknownFlushMode(s.to_owned())),
        }
    }
}

impl fmt::Display for Flush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "sync",
            Self::Post => "post",
        })
    }
}

/// Options for [`Runtime::watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Call back once at setup, with no previous value.
    pub immediate: bool,

    pub flush: Flush,
}

impl WatchOptions {
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn with_flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }
}

/// What a watcher observes.
pub struct WatchSource<T> {
    kind: SourceKind<T>,
}

enum SourceKind<T> {
    Getter(Box<dyn Fn() -> T + Send + Sync>),
    Deep { value: T, walk: fn(&T) },
}

impl<T> WatchSource<T> {
    /// Watch the result of `getter`; its reads are the dependencies.
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            kind: SourceKind::Getter(Box::new(getter)),
        }
    }
}

impl<T: Traverse> WatchSource<T> {
    /// Watch every field reachable from `value`.
    pub fn deep(value: T) -> Self {
        Self {
            kind: SourceKind::Deep {
                value,
                walk: walk::<T>,
            },
        }
    }
}

fn walk<T: Traverse>(value: &T) {
    traverse(value);
}

impl<T> WatchSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn into_getter(self) -> Box<dyn Fn() -> T + Send + Sync> {
        match self.kind {
            SourceKind::Getter(getter) => getter,
            SourceKind::Deep { value, walk } => Box::new(move || {
                walk(&value);
                value.clone()
            }),
        }
    }
}

type InvalidateFn = Box<dyn FnOnce() + Send>;

/// Registers a cleanup for the current watcher run.
///
/// The cleanup runs once, right before the next callback. Registering again
/// replaces a cleanup that has not run yet.
#[derive(Default)]
pub struct OnInvalidate {
    slot: Mutex<Option<InvalidateFn>>,
}

impl OnInvalidate {
    pub fn register<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.slot.lock() = Some(Box::new(cleanup));
    }

    fn take(&self) -> Option<InvalidateFn> {
        self.slot.lock().take()
    }
}

impl fmt::Debug for OnInvalidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnInvalidate")
            .field("registered", &self.slot.lock().is_some())
            .finish()
    }
}

type Callback<T> = Box<dyn Fn(T, Option<T>, &OnInvalidate) + Send + Sync>;

struct WatchState<T> {
    callback: Callback<T>,
    old_value: Mutex<Option<T>>,
    on_invalidate: OnInvalidate,
}

impl<T: Clone + 'static> WatchState<T> {
    fn job(&self, computation: &Computation<T>) {
        let new_value = computation.run();
        if let Some(cleanup) = self.on_invalidate.take() {
            cleanup();
        }
        let old_value = self.old_value.lock().clone();
        (self.callback)(new_value.clone(), old_value, &self.on_invalidate);
        *self.old_value.lock() = Some(new_value);
    }
}

/// A running watcher. Dropping the last handle stops it.
pub struct WatchHandle<T> {
    computation: Computation<T>,
}

impl<T> WatchHandle<T> {
    /// ID of the computation running the getter.
    pub fn id(&self) -> ComputationId {
        self.computation.id()
    }

    /// Number of times the getter has run, setup included.
    pub fn run_count(&self) -> usize {
        self.computation.run_count()
    }

    /// Stop watching. Same as dropping the handle.
    pub fn stop(self) {}
}

impl<T> fmt::Debug for WatchHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.computation.id())
            .field("run_count", &self.computation.run_count())
            .finish()
    }
}

impl Runtime {
    /// Call `callback(new, old, on_invalidate)` whenever `source` changes.
    ///
    /// Without `options.immediate`, the getter runs once at setup to capture
    /// the initial value and the callback is not called. Every trigger runs
    /// (or, with [`Flush::Post`], queues) its own job; queued jobs are not
    /// merged. The watcher runs until the returned handle is dropped.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::{Arc, Mutex};
    /// use tendril_core::reactive::{Record, Runtime, Value, WatchOptions, WatchSource};
    ///
    /// let rt = Runtime::new();
    /// let obj = Record::from_fields(&rt, [("foo", 1)]);
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    ///
    /// let reader = obj.clone();
    /// let log = seen.clone();
    /// let _watcher = rt.watch(
    ///     WatchSource::getter(move || reader.get("foo")),
    ///     move |new, old, _| log.lock().unwrap().push((new, old)),
    ///     WatchOptions::default(),
    /// );
    ///
    /// obj.set("foo", 2);
    /// assert_eq!(
    ///     *seen.lock().unwrap(),
    ///     vec![(Some(Value::Int(2)), Some(Some(Value::Int(1))))]
    /// );
    /// ```
    #[must_use = "dropping the handle stops the watcher"]
    pub fn watch<T, C>(
        &self,
        source: WatchSource<T>,
        callback: C,
        options: WatchOptions,
    ) -> WatchHandle<T>
    where
        T: Clone + Send + Sync + 'static,
        C: Fn(T, Option<T>, &OnInvalidate) + Send + Sync + 'static,
    {
        let getter = source.into_getter();
        let state = Arc::new(WatchState {
            callback: Box::new(callback),
            old_value: Mutex::new(None),
            on_invalidate: OnInvalidate::default(),
        });

        let job_state = Arc::clone(&state);
        let runtime = self.downgrade();
        let flush = options.flush;
        let scheduler = move |computation: &Computation<T>| match flush {
            Flush::Sync => job_state.job(computation),
            Flush::Post => {
                let Some(runtime) = runtime.upgrade() else {
                    return;
                };
                let state = Arc::clone(&job_state);
                let computation = computation.downgrade();
                runtime.queue_post_job(move || {
                    if let Some(computation) = computation.upgrade() {
                        state.job(&computation);
                    }
                });
            }
        };

        let computation = self.effect(getter, EffectOptions::lazy().with_scheduler(scheduler));
        tracing::debug!(
            computation = computation.id().raw(),
            %flush,
            immediate = options.immediate,
            "watching"
        );

        if options.immediate {
            state.job(&computation);
        } else {
            let initial = computation.run();
            *state.old_value.lock() = Some(initial);
        }
        WatchHandle { computation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Record, Value};
    use std::sync::atomic::{AtomicI32, Ordering};

    type Seen = Arc<Mutex<Vec<(Option<i64>, Option<Option<i64>>)>>>;

    fn watch_foo(
        rt: &Runtime,
        record: &Record,
        options: WatchOptions,
    ) -> (WatchHandle<Option<i64>>, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let reader = record.clone();
        let log = seen.clone();
        let watcher = rt.watch(
            WatchSource::getter(move || reader.get("foo").and_then(|v| v.as_int())),
            move |new, old, _| log.lock().push((new, old)),
            options,
        );
        (watcher, seen)
    }

    #[test]
    fn flush_modes_parse() {
        assert_eq!("post".parse::<Flush>(), Ok(Flush::Post));
        assert_eq!("Sync".parse::<Flush>(), Ok(Flush::Sync));
        assert_eq!(
            "pre".parse::<Flush>(),
            Err(Error::UnknownFlushMode("pre".into()))
        );
        assert_eq!(Flush::default(), Flush::Sync);
    }

    #[test]
    fn sync_watch_calls_back_inside_the_write() {
        let rt = Runtime::new();
        let record = Record::from_fields(&rt, [("foo", 1)]);
        let (_watcher, seen) = watch_foo(&rt, &record, WatchOptions::default());

        assert!(seen.lock().is_empty());
        record.set("foo", 2);
        assert_eq!(*seen.lock(), vec![(Some(2), Some(Some(1)))]);

        record.set("foo", 3);
        assert_eq!(seen.lock().last(), Some(&(Some(3), Some(Some(2)))));
    }

    #[test]
    fn immediate_watch_calls_back_at_setup() {
        let rt = Runtime::new();
        let record = Record::from_fields(&rt, [("foo", 1)]);
        let options = WatchOptions::default().with_immediate(true);
        let (_watcher, seen) = watch_foo(&rt, &record, options);

        assert_eq!(*seen.lock(), vec![(Some(1), None)]);
        record.set("foo", 5);
        assert_eq!(seen.lock().last(), Some(&(Some(5), Some(Some(1)))));
    }

    #[test]
    fn post_watch_waits_for_flush_and_does_not_merge_jobs() {
        let rt = Runtime::new();
        let record = Record::from_fields(&rt, [("foo", 1)]);
        let options = WatchOptions::default().with_flush(Flush::Post);
        let (_watcher, seen) = watch_foo(&rt, &record, options);

        record.set("foo", 2);
        record.set("foo", 3);
        assert!(seen.lock().is_empty());
        assert_eq!(rt.pending_post_jobs(), 2);

        assert_eq!(rt.flush_post_jobs(), 2);
        // Both jobs read the latest value when they run.
        assert_eq!(
            *seen.lock(),
            vec![(Some(3), Some(Some(1))), (Some(3), Some(Some(3)))]
        );
    }

    #[test]
    fn invalidation_runs_before_the_next_callback() {
        let rt = Runtime::new();
        let record = Record::from_fields(&rt, [("foo", 1)]);
        let events = Arc::new(Mutex::new(Vec::new()));

        let reader = record.clone();
        let log = events.clone();
        let _watcher = rt.watch(
            WatchSource::getter(move || reader.get("foo").and_then(|v| v.as_int())),
            move |new, _old, on_invalidate| {
                let n = new.unwrap_or_default();
                log.lock().push(format!("run {n}"));
                let log = log.clone();
                on_invalidate.register(move || log.lock().push(format!("invalidate {n}")));
            },
            WatchOptions::default(),
        );

        record.set("foo", 2);
        record.set("foo", 3);

        assert_eq!(
            *events.lock(),
            vec!["run 2", "invalidate 2", "run 3"]
        );
    }

    #[test]
    fn deep_watch_sees_nested_and_added_fields() {
        let rt = Runtime::new();
        let inner = Record::from_fields(&rt, [("leaf", 1)]);
        let outer = Record::from_fields(&rt, [("child", Value::from(inner.clone()))]);
        let calls = Arc::new(AtomicI32::new(0));

        let calls_clone = calls.clone();
        let _watcher = rt.watch(
            WatchSource::deep(outer.clone()),
            move |new: Record, old, _| {
                assert_eq!(Some(&new), old.as_ref());
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::default(),
        );

        inner.set("leaf", 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        outer.set("extra", true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        inner.set("other", "x");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dropped_watcher_stops_calling_back() {
        let rt = Runtime::new();
        let record = Record::from_fields(&rt, [("foo", 1)]);
        let (watcher, seen) = watch_foo(&rt, &record, WatchOptions::default());

        record.set("foo", 2);
        watcher.stop();
        record.set("foo", 3);

        assert_eq!(*seen.lock(), vec![(Some(2), Some(Some(1)))]);
        assert_eq!(rt.subscriber_count(record.id(), "foo"), 0);
    }

    #[test]
    fn dropping_a_post_watcher_cancels_queued_jobs() {
        let rt = Runtime::new();
        let record = Record::from_fields(&rt, [("foo", 1)]);
        let options = WatchOptions::default().with_flush(Flush::Post);
        let (watcher, seen) = watch_foo(&rt, &record, options);

        record.set("foo", 2);
        assert_eq!(rt.pending_post_jobs(), 1);

        drop(watcher);
        assert_eq!(rt.flush_post_jobs(), 1);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn writes_after_runtime_drop_reach_no_watcher() {
        let rt = Runtime::new();
        let record = Record::from_fields(&rt, [("foo", 1)]);
        let options = WatchOptions::default().with_flush(Flush::Post);
        let (_watcher, seen) = watch_foo(&rt, &record, options);

        drop(rt);
        record.set("foo", 2);
        assert!(seen.lock().is_empty());
    }
}
