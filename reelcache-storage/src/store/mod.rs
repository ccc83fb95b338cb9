//! Cache store backends.
//!
//! A store is a plain key/value service with per-key TTL and glob-pattern
//! bulk deletion. It knows nothing about namespaces or value types; the
//! [`RepositoryCache`](crate::RepositoryCache) serializes values to bytes
//! before they reach the store.
//!
//! | Backend | Scope | Notes |
//! |---------|-------|-------|
//! | [`InMemoryCacheStore`] | single process | tests, local development |
//! | [`LmdbCacheStore`] | single host | survives restarts |
//! | `RedisCacheStore` | shared | requires the `redis` feature |

use std::time::Duration;

use async_trait::async_trait;
use reelcache_core::StoreError;

pub mod lmdb;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use lmdb::{LmdbCacheStore, LmdbStoreError};
pub use memory::InMemoryCacheStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisCacheStore, RedisConfig};

/// Key/value store behind the repository cache.
///
/// Implementations must be safe for concurrent use; the cache never
/// coordinates callers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn backend_name(&self) -> &'static str;

    /// Fetch a live (non-expired) value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store a value that expires after `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Remove a single key. Returns true if a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove every key matching a glob pattern (see
    /// [`KeyPattern`](reelcache_core::KeyPattern)). Returns the number of
    /// live entries removed; zero matches is not an error.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Remaining time to live of a key, `None` if it is absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Number of live entries.
    async fn entry_count(&self) -> Result<u64, StoreError>;
}
