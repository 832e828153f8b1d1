//! Deep Traversal
//!
//! Reads every field reachable from a value so that the running computation
//! depends on the whole structure, not just its root. Used by
//! [`WatchSource::deep`](super::WatchSource::deep).
//!
//! Scalars stop the walk immediately. Observed objects are visited at most
//! once per walk, which also makes cyclic graphs safe.

use std::collections::HashSet;
use std::sync::Arc;

use super::store::ObjectId;

/// Values that can be walked by [`traverse`].
pub trait Traverse {
    /// Read every reachable field, skipping objects already in `visited`.
    fn traverse_into(&self, visited: &mut HashSet<ObjectId>);
}

/// Walk `value` with a fresh visited set and hand it back unchanged.
pub fn traverse<T: Traverse + ?Sized>(value: &T) -> &T {
    let mut visited = HashSet::new();
    value.traverse_into(&mut visited);
    value
}

macro_rules! scalar_traverse {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Traverse for $ty {
                fn traverse_into(&self, _visited: &mut HashSet<ObjectId>) {}
            }
        )*
    };
}

scalar_traverse!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, str,
);

impl<T: Traverse + ?Sized> Traverse for &T {
    fn traverse_into(&self, visited: &mut HashSet<ObjectId>) {
        (**self).traverse_into(visited);
    }
}

impl<T: Traverse + ?Sized> Traverse for Box<T> {
    fn traverse_into(&self, visited: &mut HashSet<ObjectId>) {
        (**self).traverse_into(visited);
    }
}

impl<T: Traverse + ?Sized> Traverse for Arc<T> {
    fn traverse_into(&self, visited: &mut HashSet<ObjectId>) {
        (**self).traverse_into(visited);
    }
}

impl<T: Traverse> Traverse for Option<T> {
    fn traverse_into(&self, visited: &mut HashSet<ObjectId>) {
        if let Some(value) = self {
            value.traverse_into(visited);
        }
    }
}
