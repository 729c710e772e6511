//! In-memory ordered store.
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::CacheError;
use crate::store::{Entry, OrderedStore};

/// `BTreeMap`-backed store. Used by tests and as the index inside [`super::LogStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read()?.len())
    }

    /// Returns `true` if no key is stored.
    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

impl OrderedStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        self.entries.write()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn scan(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<Entry>, CacheError> {
        // BTreeMap::range panics on an inverted range.
        if lower > upper {
            return Ok(Vec::new());
        }
        let entries = self.entries.read()?;
        let range = entries.range::<[u8], _>((Bound::Included(lower), Bound::Included(upper)));
        Ok(range.map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
