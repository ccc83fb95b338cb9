//! reelcache storage - cache stores and the read-through repository cache
//!
//! Pairs a [`CacheStore`] backend with [`RepositoryCache`], which serves
//! repository reads from the store and evicts namespaces after writes.

pub mod invalidation;
pub mod read_through;
pub mod repository;
mod single_flight;
pub mod stats;
pub mod store;

pub use invalidation::{Invalidator, NoOpInvalidator, WriteEvent};
pub use read_through::RepositoryCache;
pub use repository::{CachedRepository, Repository};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{CacheStore, InMemoryCacheStore, LmdbCacheStore, LmdbStoreError};

#[cfg(feature = "redis")]
pub use store::{RedisCacheStore, RedisConfig};

// Re-export core types so most callers only need this crate
pub use reelcache_core::{
    derive_key, CacheConfig, CacheError, CacheKey, CacheResult, CacheValue, KeyError, Namespace,
    StoreError, StorePolicy,
};
