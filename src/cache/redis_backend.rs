//! Redis cache backend.
//!
//! Supports server-side TTL (`SET ... EX`) and client-side TTL (entry
//! carries its own expiry, checked on read, stored without a server TTL)
//! modes. Key format: `watchpost:cache:{infix:}v{VERSION}:{digest}`.

use redis::Commands;

use super::{CacheEntry, CacheError, CacheKey, Storage, VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlMode {
    ServerSide,
    ClientSide,
}

pub struct RedisStorage {
    client: redis::Client,
    infix: Option<String>,
    ttl_mode: TtlMode,
}

impl RedisStorage {
    pub fn new(url: &str, infix: Option<String>, ttl_mode: TtlMode) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Redis(e.to_string()))?;
        Ok(Self { client, infix, ttl_mode })
    }

    fn redis_key(&self, key: &CacheKey) -> String {
        match &self.infix {
            Some(infix) => format!("watchpost:cache:{infix}:v{VERSION}:{}", key.digest()),
            None => format!("watchpost:cache:v{VERSION}:{}", key.digest()),
        }
    }
}

impl Storage for RedisStorage {
    fn get(&self, key: &CacheKey, return_expired: bool) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| CacheError::Redis(e.to_string()))?;
        let raw: Option<Vec<u8>> = conn
            .get(self.redis_key(key))
            .map_err(|e| CacheError::Redis(e.to_string()))?;
        let Some(raw) = raw else { return Ok(None) };
        let entry: CacheEntry =
            bincode::deserialize(&raw).map_err(|e| CacheError::Serialization(e.to_string()))?;

        if self.ttl_mode == TtlMode::ClientSide && !return_expired && entry.is_expired() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| CacheError::Redis(e.to_string()))?;
        let payload = bincode::serialize(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let redis_key = self.redis_key(key);

        match self.ttl_mode {
            TtlMode::ServerSide => {
                if let Some(expires_at) = entry.expires_at {
                    let ttl_seconds = (expires_at - chrono::Utc::now()).num_seconds().max(1) as u64;
                    conn.set_ex::<_, _, ()>(redis_key, payload, ttl_seconds)
                        .map_err(|e| CacheError::Redis(e.to_string()))?;
                } else {
                    conn.set::<_, _, ()>(redis_key, payload)
                        .map_err(|e| CacheError::Redis(e.to_string()))?;
                }
            }
            TtlMode::ClientSide => {
                conn.set::<_, _, ()>(redis_key, payload)
                    .map_err(|e| CacheError::Redis(e.to_string()))?;
            }
        }
        Ok(())
    }
}
