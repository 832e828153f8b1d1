//! Observable Record
//!
//! A small dynamic record whose accessors report reads and writes to a
//! [`Runtime`]. It plays the part of the field-interception layer:
//!
//! | accessor          | reports                                   |
//! |-------------------|-------------------------------------------|
//! | `get`, `has`      | `track(id, key)`                          |
//! | `keys`, `len`     | `track(id, ITERATE)`                      |
//! | `set`             | `trigger(id, key, Add)` or `Set`          |
//! | `delete`          | `trigger(id, key, Delete)` if key existed |
//!
//! Keys keep insertion order. Cloning a record clones the handle, not the
//! fields; when the last handle drops, the record's dependency entries are
//! released from the runtime.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::runtime::{Runtime, WeakRuntime};
use super::store::{MutationKind, ObjectId, ITERATE};
use super::traverse::Traverse;

/// A dynamically typed field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Record(Record),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl Traverse for Value {
    fn traverse_into(&self, visited: &mut HashSet<ObjectId>) {
        if let Self::Record(record) = self {
            record.traverse_into(visited);
        }
    }
}

/// An observable record of named fields.
///
/// # Example
///
/// ```rust
/// use tendril_core::reactive::{EffectOptions, Record, Runtime};
///
/// let rt = Runtime::new();
/// let counter = Record::from_fields(&rt, [("count", 0)]);
///
/// let reader = counter.clone();
/// let effect = rt.effect(move || { reader.get("count"); }, EffectOptions::default());
///
/// counter.set("count", 1);
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

struct RecordInner {
    id: ObjectId,
    runtime: WeakRuntime,
    fields: RwLock<IndexMap<Arc<str>, Value>>,
}

impl Record {
    /// Create an empty record observed by `runtime`.
    pub fn new(runtime: &Runtime) -> Self {
        Self::from_fields(runtime, std::iter::empty::<(Arc<str>, Value)>())
    }

    /// Create a record with initial fields. Building it triggers nothing.
    pub fn from_fields<K, V, I>(runtime: &Runtime, fields: I) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: Arc::new(RecordInner {
                id: ObjectId::new(),
                runtime: runtime.downgrade(),
                fields: RwLock::new(fields),
            }),
        }
    }

    /// The record's identity in the dependency store.
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Read a field.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.track(key);
        self.peek(key)
    }

    /// Read a field without tracking it.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.inner.fields.read().get(key).cloned()
    }

    /// Check whether a field exists. Tracks the key, like a read.
    pub fn has(&self, key: &str) -> bool {
        self.track(key);
        self.inner.fields.read().contains_key(key)
    }

    /// List the field names in insertion order. Tracks the key set.
    pub fn keys(&self) -> Vec<String> {
        self.track_shape();
        self.inner
            .fields
            .read()
            .keys()
            .map(|k| k.to_string())
            .collect()
    }

    /// Number of fields. Tracks the key set.
    pub fn len(&self) -> usize {
        self.track_shape();
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a field, notifying its readers.
    ///
    /// Creating a field also notifies computations that enumerated the keys.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let previous = self.inner.fields.write().insert(Arc::from(key), value.into());
        let kind = if previous.is_some() {
            MutationKind::Set
        } else {
            MutationKind::Add
        };
        // The old value may hold the last handle to another record.
        drop(previous);
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.trigger(self.inner.id, key, kind);
        }
    }

    /// Remove a field. Returns whether it existed; only then are readers
    /// and enumerators notified.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.fields.write().shift_remove(key);
        let existed = removed.is_some();
        drop(removed);
        if existed {
            if let Some(runtime) = self.inner.runtime.upgrade() {
                runtime.trigger(self.inner.id, key, MutationKind::Delete);
            }
        }
        existed
    }

    fn track(&self, key: &str) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id, key);
        }
    }

    fn track_shape(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id, ITERATE);
        }
    }
}

impl Traverse for Record {
    fn traverse_into(&self, visited: &mut HashSet<ObjectId>) {
        if !visited.insert(self.id()) {
            return;
        }
        for key in self.keys() {
            if let Some(value) = self.get(&key) {
                value.traverse_into(visited);
            }
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl fmt::Debug for Record {
    // Fields are not printed: records may form cycles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.inner.id)
            .field("fields", &self.inner.fields.read().len())
            .finish()
    }
}

impl Drop for RecordInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.release(self.id);
        }
    }
}
