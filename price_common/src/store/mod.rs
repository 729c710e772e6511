//! Ordered key-value storage.
//!
//! The price cache only needs three operations from its store: a point `get`, an
//! unconditional `put` and an inclusive range `scan` in ascending byte order. This module
//! defines that contract as [`OrderedStore`] and ships two implementations:
//!
//! - `memory`: [`MemoryStore`], a `BTreeMap` behind a `RwLock`; nothing survives a restart.
//! - `journal`: [`LogStore`], the same index rebuilt on open from an append-only,
//!   checksummed journal file, so every acknowledged `put` is durable.
//!
//! There are no transactions: each `put` stands alone.
pub mod journal;
pub mod memory;

pub use journal::LogStore;
pub use memory::MemoryStore;

use crate::error::CacheError;

/// A single key/value pair returned by [`OrderedStore::scan`].
pub type Entry = (Vec<u8>, Vec<u8>);

/// Minimal ordered key-value store contract.
///
/// Implementations must be safe to share between a writer thread and any number of
/// reader threads; single-key operations are atomic.
pub trait OrderedStore: Send + Sync {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError>;

    /// Unconditional upsert.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError>;

    /// All entries with `lower <= key <= upper`, in ascending key order.
    ///
    /// Returns an empty vector when nothing falls in range or when `lower > upper`.
    fn scan(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<Entry>, CacheError>;
}

impl<S: OrderedStore + ?Sized> OrderedStore for std::sync::Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        (**self).put(key, value)
    }

    fn scan(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<Entry>, CacheError> {
        (**self).scan(lower, upper)
    }
}
