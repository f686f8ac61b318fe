//! Pluggable, TTL-based result/value cache.
//!
//! [`Storage`] is the backend abstraction; [`Cache`] is the ergonomic
//! facade applications use (`get`/`store`/`memoize`). [`CheckCache`] scopes
//! a `Cache` to a single `(check, environment)` pair.

mod disk;
mod memory;

#[cfg(feature = "redis-storage")]
mod redis_backend;

pub use disk::DiskStorage;
pub use memory::InMemoryStorage;

#[cfg(feature = "redis-storage")]
pub use redis_backend::RedisStorage;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version of the on-disk/on-wire [`CacheEntry`] encoding. Bumping this
/// invalidates all previously-written entries, since they live under a
/// version-scoped path/key.
pub const VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend IO error: {0}")]
    Io(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache configuration error: {0}")]
    Configuration(String),

    #[cfg(feature = "redis-storage")]
    #[error("redis error: {0}")]
    Redis(String),
}

/// Opaque cache key. Callers build one from a stable string; storage
/// backends hash it as needed for sharding/namespacing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(pub String);

impl CacheKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Hex-encoded SHA-256 digest, used by backends that shard or namespace
    /// by hash rather than storing the raw key.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A stored value plus its expiry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub payload: Vec<u8>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(payload: Vec<u8>, ttl: Option<Duration>) -> Self {
        let stored_at = Utc::now();
        let expires_at = ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()).map(|d| stored_at + d);
        Self { version: VERSION, payload, stored_at, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }
}

/// A cache storage backend.
pub trait Storage: Send + Sync {
    /// Fetches the entry for `key`. When `return_expired` is true, an
    /// expired entry is still returned rather than treated as a miss.
    fn get(&self, key: &CacheKey, return_expired: bool) -> Result<Option<CacheEntry>, CacheError>;

    fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError>;
}

/// Tries each backing store in order; on a hit from a later store,
/// propagates the entry to all earlier stores (write-through warm-up)
/// before returning it. Propagation failures are logged, not raised.
pub struct ChainedStorage {
    backends: Vec<Arc<dyn Storage>>,
}

impl ChainedStorage {
    pub fn new(backends: Vec<Arc<dyn Storage>>) -> Self {
        Self { backends }
    }
}

impl Storage for ChainedStorage {
    fn get(&self, key: &CacheKey, return_expired: bool) -> Result<Option<CacheEntry>, CacheError> {
        for (index, backend) in self.backends.iter().enumerate() {
            if let Some(entry) = backend.get(key, return_expired)? {
                for earlier in &self.backends[..index] {
                    if let Err(err) = earlier.store(key, entry.clone()) {
                        tracing::warn!(error = %err, "failed to propagate cache entry to earlier backend");
                    }
                }
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        // Writes go to the first (fastest) backend; propagation happens
        // lazily on read from a slower backend.
        match self.backends.first() {
            Some(backend) => backend.store(key, entry),
            None => Ok(()),
        }
    }
}

/// Ergonomic facade over a [`Storage`] backend.
pub struct Cache {
    storage: Arc<dyn Storage>,
}

impl Cache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> Result<Option<T>, CacheError> {
        self.get_raw(key, false)
    }

    pub fn get_allow_expired<T: for<'de> Deserialize<'de>>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<T>, CacheError> {
        self.get_raw(key, true)
    }

    fn get_raw<T: for<'de> Deserialize<'de>>(
        &self,
        key: &CacheKey,
        return_expired: bool,
    ) -> Result<Option<T>, CacheError> {
        match self.storage.get(key, return_expired)? {
            Some(entry) => {
                let value = bincode::deserialize(&entry.payload)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn store<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let payload = bincode::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.storage.store(key, CacheEntry::new(payload, ttl))
    }

    /// Looks up `key` (or the key produced by `key_generator`, mutually
    /// exclusive — callers pass exactly one) and, on a miss, computes and
    /// stores `f()`'s result.
    pub fn memoize<T, F>(
        &self,
        key: Option<&CacheKey>,
        key_generator: Option<&dyn Fn() -> CacheKey>,
        ttl: Option<Duration>,
        f: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + for<'de> Deserialize<'de>,
        F: FnOnce() -> Result<T, CacheError>,
    {
        let resolved_key = match (key, key_generator) {
            (Some(_), Some(_)) => {
                return Err(CacheError::Configuration(
                    "memoize requires exactly one of `key` or `key_generator`".to_string(),
                ));
            }
            (Some(k), None) => k.clone(),
            (None, Some(key_gen)) => key_gen(),
            (None, None) => {
                return Err(CacheError::Configuration(
                    "memoize requires exactly one of `key` or `key_generator`".to_string(),
                ));
            }
        };

        if let Some(value) = self.get(&resolved_key)? {
            return Ok(value);
        }
        let value = f()?;
        self.store(&resolved_key, &value, ttl)?;
        Ok(value)
    }
}

/// A [`Cache`] pre-scoped with key prefix `"{check}:{environment}"`.
pub struct CheckCache {
    cache: Cache,
    prefix: String,
}

impl CheckCache {
    pub fn new(cache: Cache, check_name: &str, environment_name: &str) -> Self {
        Self { cache, prefix: format!("{check_name}:{environment_name}") }
    }

    fn scoped_key(&self, key: &str) -> CacheKey {
        CacheKey::new(format!("{}:{key}", self.prefix))
    }

    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.cache.get(&self.scoped_key(key))
    }

    pub fn store<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.cache.store(&self.scoped_key(key), value, ttl)
    }
}
