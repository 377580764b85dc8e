//! Hash collection aliases.
//!
//! With the `gxhash` feature the blob cache and executor registry use gxhash;
//! without it they fall back to the std hasher so the crate still builds on
//! CPUs lacking AES/SSE2 intrinsics.

#[cfg(feature = "gxhash")]
pub use gxhash::{GxBuildHasher, HashMap, HashMapExt, HashSet, HashSetExt};

#[cfg(not(feature = "gxhash"))]
pub use std::collections::{HashMap, HashSet};

/// Hasher used for `DashMap` caches
#[cfg(not(feature = "gxhash"))]
pub type GxBuildHasher = std::hash::RandomState;

/// `new`/`with_capacity` constructors matching the gxhash extension trait
#[cfg(not(feature = "gxhash"))]
pub trait HashMapExt {
    /// Empty map
    fn new() -> Self;
    /// Map with room for `capacity` entries
    fn with_capacity(capacity: usize) -> Self;
}

#[cfg(not(feature = "gxhash"))]
impl<K, V> HashMapExt for HashMap<K, V> {
    fn new() -> Self {
        HashMap::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity_and_hasher(capacity, Default::default())
    }
}

/// `new`/`with_capacity` constructors matching the gxhash extension trait
#[cfg(not(feature = "gxhash"))]
pub trait HashSetExt {
    /// Empty set
    fn new() -> Self;
    /// Set with room for `capacity` entries
    fn with_capacity(capacity: usize) -> Self;
}

#[cfg(not(feature = "gxhash"))]
impl<T> HashSetExt for HashSet<T> {
    fn new() -> Self {
        HashSet::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        HashSet::with_capacity_and_hasher(capacity, Default::default())
    }
}
