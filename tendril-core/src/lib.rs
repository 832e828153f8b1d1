//! Tendril Core
//!
//! This crate provides fine-grained reactive dependency tracking, the kernel
//! a state or UI framework builds on. It implements:
//!
//! - Automatic dependency tracking between object fields and computations
//! - Computations (effects) with cleanup-before-rerun and custom schedulers
//! - Watchers with old/new values, invalidation, and deferred flushing
//! - Deep traversal of observed object graphs
//!
//! # Architecture
//!
//! - `reactive`: the runtime, dependency store, computations and watchers
//! - `error`: error types
//!
//! # Example
//!
//! ```rust
//! use tendril_core::reactive::{EffectOptions, Record, Runtime};
//!
//! let rt = Runtime::new();
//! let obj = Record::from_fields(&rt, [("foo", 1)]);
//!
//! let reader = obj.clone();
//! let effect = rt.effect(
//!     move || {
//!         reader.keys();
//!     },
//!     EffectOptions::default(),
//! );
//!
//! // Adding a key changes the key set: the effect re-runs.
//! obj.set("bar", 2);
//! assert_eq!(effect.run_count(), 2);
//!
//! // Assigning an existing key does not.
//! obj.set("bar", 3);
//! assert_eq!(effect.run_count(), 2);
//! ```

pub mod error;
pub mod reactive;

pub use error::Error;
