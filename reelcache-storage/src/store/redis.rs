//! Redis-backed cache store.
//!
//! Requires the `redis` feature. Entries use `SET .. PX`, so expiry is
//! handled by the server to the millisecond; pattern deletion is `KEYS` + `DEL`.

use std::time::Duration;

use ::redis::{aio::MultiplexedConnection, AsyncCommands, Client, RedisError};
use async_trait::async_trait;
use reelcache_core::StoreError;

use super::CacheStore;

pub const ENV_REDIS_URL: &str = "REELCACHE_REDIS_URL";
pub const ENV_REDIS_PREFIX: &str = "REELCACHE_REDIS_PREFIX";

/// Redis connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Prefix prepended to every key, so several deployments can share a
    /// server. Empty by default.
    pub prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            prefix: String::new(),
        }
    }
}

impl RedisConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var(ENV_REDIS_URL).unwrap_or(defaults.url),
            prefix: std::env::var(ENV_REDIS_PREFIX).unwrap_or(defaults.prefix),
        }
    }
}

fn store_error(op: &str, e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::unavailable("redis", format!("{} failed: {}", op, e))
    } else {
        StoreError::Transaction {
            reason: format!("Redis {} error: {}", op, e),
        }
    }
}

/// Redis-backed cache store
///
/// Uses one multiplexed connection, cloned per call.
pub struct RedisCacheStore {
    conn: MultiplexedConnection,
    config: RedisConfig,
}

impl RedisCacheStore {
    /// Connect to the configured server.
    pub async fn connect(config: RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str()).map_err(|e| store_error("open", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| store_error("connect", e))?;
        Ok(Self { conn, config })
    }

    /// Connect using environment variables
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::connect(RedisConfig::from_env()).await
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.config.prefix, key)
    }

    async fn matching_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        // The prefix is literal; escape it so it cannot act as a wildcard.
        let pattern = format!(
            "{}{}",
            reelcache_core::pattern::escape(&self.config.prefix),
            pattern
        );
        conn.keys(&pattern)
            .await
            .map_err(|e| store_error("KEYS", e))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(self.prefixed(key))
            .await
            .map_err(|e| store_error("GET", e))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.pset_ex::<_, _, ()>(self.prefixed(key), value, expiry_millis(ttl))
            .await
            .map_err(|e| store_error("PSETEX", e))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn
            .del(self.prefixed(key))
            .await
            .map_err(|e| store_error("DEL", e))?;
        Ok(deleted > 0)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let keys = self.matching_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let deleted: i64 = conn
            .del(&keys)
            .await
            .map_err(|e| store_error("DEL", e))?;
        Ok(deleted.max(0) as u64)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let remaining: i64 = conn
            .pttl(self.prefixed(key))
            .await
            .map_err(|e| store_error("PTTL", e))?;
        Ok(remaining_ttl(remaining))
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        Ok(self.matching_keys("*").await?.len() as u64)
    }
}

/// PX rejects zero, so anything shorter than a millisecond rounds up.
fn expiry_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

// PTTL replies -2 for a missing key and -1 for a key without expiry.
fn remaining_ttl(reply: i64) -> Option<Duration> {
    match reply {
        -2 => None,
        -1 => Some(Duration::MAX),
        ms => Some(Duration::from_millis(ms.max(0) as u64)),
    }
}
