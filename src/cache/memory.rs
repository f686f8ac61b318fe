//! In-process cache backend.

use dashmap::DashMap;

use super::{CacheEntry, CacheError, CacheKey, Storage};

/// A process-local cache backend. Entries do not survive a restart.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &CacheKey, return_expired: bool) -> Result<Option<CacheEntry>, CacheError> {
        match self.entries.get(key) {
            Some(entry) if return_expired || !entry.is_expired() => Ok(Some(entry.clone())),
            _ => Ok(None),
        }
    }

    fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(key.clone(), entry);
        Ok(())
    }
}
