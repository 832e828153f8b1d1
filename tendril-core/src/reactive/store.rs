//! Dependency Store
//!
//! Maps an observed object and one of its field keys to the set of
//! computations that read that field during their latest run:
//!
//! ```text
//! ObjectId -> FieldKey -> { ComputationId -> Weak<computation> }
//! ```
//!
//! Objects are referenced by [`ObjectId`] only, so the store never keeps an
//! observed object alive. An object's entries are dropped with
//! [`DepStore::release`] once the object goes away.
//!
//! Computations are held weakly as well. A computation is owned by its
//! handles; when the last one drops it leaves every set it belongs to.
//!
//! Subscriber sets are insertion ordered, which makes dispatch order
//! deterministic (first subscriber runs first). Sets that become empty are
//! left in place; they cost one map slot and vanish when their object is
//! released.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::subscriber::{ComputationId, Subscriber};
use crate::error::Error;

/// Identity of an observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocate a new unique object ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

/// A key that can be depended on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKey {
    /// A single named field.
    Field(Arc<str>),

    /// The object's key set. Read by enumeration, written by add/delete.
    Iterate,
}

/// Sentinel key for "the set of keys of this object".
pub const ITERATE: FieldKey = FieldKey::Iterate;

impl From<&str> for FieldKey {
    fn from(name: &str) -> Self {
        Self::Field(Arc::from(name))
    }
}

impl From<String> for FieldKey {
    fn from(name: String) -> Self {
        Self::Field(Arc::from(name))
    }
}

impl From<Arc<str>> for FieldKey {
    fn from(name: Arc<str>) -> Self {
        Self::Field(name)
    }
}

impl From<&FieldKey> for FieldKey {
    fn from(key: &FieldKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Iterate => f.write_str("<iterate>"),
        }
    }
}

/// What kind of write happened to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// An existing field was assigned.
    Set,

    /// A field that did not exist was created.
    Add,

    /// An existing field was removed.
    Delete,
}

impl MutationKind {
    /// Whether this mutation changes the object's key set, and therefore
    /// also concerns `ITERATE` subscribers.
    pub fn changes_shape(self) -> bool {
        matches!(self, Self::Add | Self::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for MutationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "set" => Ok(Self::Set),
            "add" => Ok(Self::Add),
            "delete" => Ok(Self::Delete),
            _ => Err(Error::UnknownMutationKind(s.to_owned())),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) type SubscriberSet = IndexMap<ComputationId, Weak<dyn Subscriber>>;

/// One subscriber set, shared between the store and the memberships of
/// the computations inside it.
pub(crate) type Dep = Arc<Mutex<SubscriberSet>>;
pub(crate) type WeakDep = Weak<Mutex<SubscriberSet>>;

type KeyMap = HashMap<FieldKey, Dep>;

#[derive(Default)]
pub(crate) struct DepStore {
    objects: HashMap<ObjectId, KeyMap>,
}

impl DepStore {
    /// Get the subscriber set for `(object, key)`, creating it if needed.
    pub(crate) fn dep_for(&mut self, object: ObjectId, key: FieldKey) -> Dep {
        Arc::clone(
            self.objects
                .entry(object)
                .or_default()
                .entry(key)
                .or_default(),
        )
    }

    pub(crate) fn get(&self, object: ObjectId, key: &FieldKey) -> Option<Dep> {
        self.objects.get(&object)?.get(key).cloned()
    }

    /// Remove every entry of `object`. The removed map is returned so the
    /// caller can drop it after releasing the store lock.
    pub(crate) fn release(&mut self, object: ObjectId) -> Option<KeyMap> {
        self.objects.remove(&object)
    }

    pub(crate) fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn key_count(&self, object: ObjectId) -> usize {
        self.objects.get(&object).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique() {
        assert_ne!(ObjectId::new(), ObjectId::new());
    }

    #[test]
    fn mutation_kinds_parse_and_fail_fast() {
        assert_eq!("set".parse::<MutationKind>(), Ok(MutationKind::Set));
        assert_eq!("ADD".parse::<MutationKind>(), Ok(MutationKind::Add));
        assert_eq!("delete".parse::<MutationKind>(), Ok(MutationKind::Delete));
        assert_eq!(
            "clear".parse::<MutationKind>(),
            Err(Error::UnknownMutationKind("clear".into()))
        );
    }

    #[test]
    fn only_add_and_delete_change_shape() {
        assert!(!MutationKind::Set.changes_shape());
        assert!(MutationKind::Add.changes_shape());
        assert!(MutationKind::Delete.changes_shape());
    }

    #[test]
    fn iterate_key_is_distinct_from_fields() {
        assert_ne!(ITERATE, FieldKey::from("iterate"));
        assert_eq!(ITERATE.to_string(), "<iterate>");
        assert_eq!(FieldKey::from("foo").to_string(), "foo");
    }

    #[test]
    fn store_reuses_sets_and_releases_objects() {
        let mut store = DepStore::default();
        let object = ObjectId::new();

        let first = store.dep_for(object, "foo".into());
        let again = store.dep_for(object, "foo".into());
        assert!(Arc::ptr_eq(&first, &again));

        store.dep_for(object, ITERATE);
        assert_eq!(store.key_count(object), 2);
        assert!(store.get(object, &"bar".into()).is_none());

        let released = store.release(object);
        assert_eq!(released.map(|keys| keys.len()), Some(2));
        assert_eq!(store.object_count(), 0);
        assert!(store.get(object, &"foo".into()).is_none());
    }
}
