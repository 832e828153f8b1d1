//! Reactive Primitives
//!
//! This module implements the dependency-tracking kernel: computations,
//! track/trigger, schedulers, and watchers.
//!
//! # Concepts
//!
//! ## Observed objects
//!
//! Any record whose field accesses report to a [`Runtime`]: reads call
//! [`Runtime::track`], writes call [`Runtime::trigger`]. The runtime only
//! knows objects by [`ObjectId`]. [`Record`] is a ready-made observed
//! object with explicit accessors.
//!
//! ## Computations
//!
//! A [`Computation`] is a re-runnable body. Every field it reads while
//! running subscribes it to that field; writing the field re-runs it (or
//! hands it to its [`Scheduler`]). Each run starts from an empty dependency
//! set, so a computation depends on exactly what its latest run read. The
//! runtime only refers to computations weakly: a computation runs for as
//! long as some handle to it is alive.
//!
//! ## Shape dependencies
//!
//! Enumerating an object's keys depends on the sentinel [`ITERATE`] key.
//! Adding or deleting a field notifies those subscribers too, while
//! assigning an existing field does not.
//!
//! ## Watchers
//!
//! [`Runtime::watch`] runs a callback with the new and previous value of a
//! getter (or of a deeply traversed value) whenever it changes, either
//! synchronously or through the runtime's deferred queue.
//!
//! # Implementation Notes
//!
//! There is no global state. The runtime is an explicit, cheaply cloneable
//! handle that owns the dependency store, one active computation stack per
//! thread, and the deferred queue.

mod context;
mod effect;
mod record;
mod runtime;
mod store;
mod subscriber;
mod traverse;
mod watch;

pub use effect::{Computation, EffectOptions, Scheduler};
pub use record::{Record, Value};
pub use runtime::{PostJob, Runtime, WeakRuntime};
pub use store::{FieldKey, MutationKind, ObjectId, ITERATE};
pub use subscriber::ComputationId;
pub use traverse::{traverse, Traverse};
pub use watch::{Flush, OnInvalidate, WatchHandle, WatchOptions, WatchSource};
