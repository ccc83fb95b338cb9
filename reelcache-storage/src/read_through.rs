//! Read-through cache for repository queries.
//!
//! [`RepositoryCache`] wraps any async read with get / compute / set-on-miss
//! semantics and evicts whole namespaces after writes.
//!
//! # Ordering
//!
//! Within one [`RepositoryCache::cache_query`] call the store read happens
//! before the query, which happens before the store write. Nothing orders
//! separate calls: a miss that is still computing when its namespace is
//! invalidated will write its (now stale) result afterwards, and that entry
//! lives until its TTL runs out. Keep TTLs short for namespaces where that
//! window matters.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reelcache_core::{
    derive_key, CacheConfig, CacheError, CacheKey, CacheResult, CacheValue, ConfigError,
    KeyError, Namespace, StoreError,
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::invalidation::WriteEvent;
use crate::single_flight::InFlight;
use crate::stats::CacheStats;
use crate::store::CacheStore;

/// Read-through cache in front of repository queries.
///
/// Construct one per store and share it (it is cheap to clone):
///
/// ```ignore
/// let cache = RepositoryCache::new(Arc::new(InMemoryCacheStore::new()), CacheConfig::default());
///
/// let key = cache.key("dialects", &json!({"status": "active"}), None::<&[&str]>)?;
/// let dialects: Vec<Dialect> = cache
///     .cache_query(|| repo.find_active(), &key, None)
///     .await?;
///
/// // after a write
/// cache.invalidate_namespace("dialects").await?;
/// ```
pub struct RepositoryCache<S: ?Sized> {
    store: Arc<S>,
    config: CacheConfig,
    stats: Arc<CacheStats>,
    in_flight: Arc<InFlight>,
}

impl<S> RepositoryCache<S>
where
    S: CacheStore + ?Sized,
{
    /// Create a new repository cache.
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(CacheStats::new()),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Create a repository cache after validating `config`.
    pub fn try_new(store: Arc<S>, config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(store, config))
    }

    /// Create a repository cache with default configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Derive the key for a query. See [`derive_key`].
    pub fn key<F, P>(
        &self,
        namespace: &str,
        filter: &F,
        projection: Option<&[P]>,
    ) -> Result<CacheKey, KeyError>
    where
        F: Serialize + ?Sized,
        P: AsRef<str>,
    {
        derive_key(namespace, filter, projection)
    }

    /// Serve `key` from the store, or run the query and store its result.
    ///
    /// - On a hit `run` is not called.
    /// - On a miss `run` is called once. An empty result (see
    ///   [`CacheValue::is_empty_result`]) is returned without being stored;
    ///   anything else is stored for `ttl`, or the configured default TTL
    ///   when `ttl` is `None` or zero.
    /// - An error from `run` is returned as is and nothing is stored.
    ///
    /// Store failures follow the configured read/write policies: best-effort
    /// treats them as a miss (or a skipped write), strict returns them as `E`.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn cache_query<T, E, F, Fut>(
        &self,
        run: F,
        key: &CacheKey,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: CacheValue,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.config.enabled {
            return run().await;
        }

        if let Some(value) = self.lookup::<T>(key).await? {
            return Ok(value);
        }

        if !self.config.single_flight {
            return self.run_and_store(run, key, ttl).await;
        }

        let flight = self.in_flight.acquire(key).await;
        if flight.waited() {
            if let Some(value) = self.lookup::<T>(key).await? {
                self.stats.record_coalesced();
                return Ok(value);
            }
        }
        self.run_and_store(run, key, ttl).await
    }

    /// Delete every key in `namespace`. Returns how many were removed.
    ///
    /// Under the best-effort invalidation policy a store failure is logged
    /// and reported as zero keys removed.
    #[instrument(skip(self))]
    pub async fn invalidate_namespace(&self, namespace: &str) -> CacheResult<u64> {
        let namespace = Namespace::new(namespace)?;
        if !self.config.enabled {
            return Ok(0);
        }

        match self.store.delete_by_pattern(&namespace.pattern()).await {
            Ok(deleted) => {
                self.stats.record_invalidation(deleted);
                debug!(%namespace, deleted, "namespace invalidated");
                Ok(deleted)
            }
            Err(e) => self.recover_invalidation(e, &namespace),
        }
    }

    /// Delete a single key.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn invalidate_key(&self, key: &CacheKey) -> CacheResult<bool> {
        if !self.config.enabled {
            return Ok(false);
        }

        match self.store.delete(key.as_str()).await {
            Ok(removed) => {
                self.stats.record_invalidation(u64::from(removed));
                Ok(removed)
            }
            Err(e) => {
                self.stats.record_store_error();
                if self.config.invalidation_policy.is_strict() {
                    return Err(e.into());
                }
                warn!(error = %e, "cache key invalidation failed, continuing");
                Ok(false)
            }
        }
    }

    /// Invalidate the namespace touched by a write.
    pub async fn on_write(&self, event: &WriteEvent) -> CacheResult<u64> {
        debug!(?event, "write observed");
        self.invalidate_namespace(event.namespace()).await
    }

    /// Number of keys whose miss is currently being computed under
    /// single-flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn lookup<T: CacheValue>(&self, key: &CacheKey) -> CacheResult<Option<T>> {
        match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    self.stats.record_hit();
                    debug!("cache hit");
                    Ok(Some(value))
                }
                Err(e) => {
                    // Overwritten by the next non-empty miss.
                    self.stats.record_decode_error();
                    self.stats.record_miss();
                    warn!(error = %e, "cached payload could not be decoded, treating as miss");
                    Ok(None)
                }
            },
            Ok(None) => {
                self.stats.record_miss();
                debug!("cache miss");
                Ok(None)
            }
            Err(e) => {
                self.stats.record_store_error();
                if self.config.read_policy.is_strict() {
                    return Err(e.into());
                }
                self.stats.record_miss();
                warn!(error = %e, backend = self.store.backend_name(), "cache read failed, running query");
                Ok(None)
            }
        }
    }

    async fn run_and_store<T, E, F, Fut>(
        &self,
        run: F,
        key: &CacheKey,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: CacheValue,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = run().await?;

        if value.is_empty_result() {
            self.stats.record_skipped_empty();
            debug!("empty result, not cached");
            return Ok(value);
        }

        let ttl = ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(self.config.default_ttl);

        let written = match serde_json::to_vec(&value) {
            Ok(bytes) => self.store.set(key.as_str(), &bytes, ttl).await,
            Err(e) => Err(StoreError::Serialization {
                reason: e.to_string(),
            }),
        };

        match written {
            Ok(()) => {
                self.stats.record_write();
                debug!(ttl_secs = ttl.as_secs(), "result cached");
            }
            Err(e) => {
                self.stats.record_store_error();
                if self.config.write_policy.is_strict() {
                    return Err(CacheError::from(e).into());
                }
                warn!(error = %e, backend = self.store.backend_name(), "cache write failed, returning uncached result");
            }
        }

        Ok(value)
    }

    fn recover_invalidation(&self, e: StoreError, namespace: &Namespace) -> CacheResult<u64> {
        self.stats.record_store_error();
        if self.config.invalidation_policy.is_strict() {
            return Err(e.into());
        }
        warn!(
            error = %e,
            %namespace,
            backend = self.store.backend_name(),
            "namespace invalidation failed, stale entries live until TTL"
        );
        Ok(0)
    }
}

impl<S: ?Sized> Clone for RepositoryCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCacheStore;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Dialect {
        code: String,
        status: String,
    }

    impl CacheValue for Dialect {}

    #[derive(Debug, PartialEq)]
    enum TestError {
        Query(&'static str),
        Cache(CacheError),
    }

    impl From<CacheError> for TestError {
        fn from(e: CacheError) -> Self {
            Self::Cache(e)
        }
    }

    fn active_key() -> CacheKey {
        derive_key("dialects", &json!({"status": "active"}), None::<&[&str]>).unwrap()
    }

    fn english() -> Dialect {
        Dialect {
            code: "en".to_string(),
            status: "active".to_string(),
        }
    }

    fn make_cache(config: CacheConfig) -> (RepositoryCache<InMemoryCacheStore>, Arc<InMemoryCacheStore>) {
        let store = Arc::new(InMemoryCacheStore::new());
        (RepositoryCache::new(Arc::clone(&store), config), store)
    }

    #[tokio::test]
    async fn test_hit_short_circuits_compute() {
        let (cache, _store) = make_cache(CacheConfig::default());
        let calls = AtomicUsize::new(0);
        let key = active_key();

        let first: Result<Vec<Dialect>, TestError> = cache
            .cache_query(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![english()])
                },
                &key,
                None,
            )
            .await;
        assert_eq!(first.unwrap(), vec![english()]);

        let second: Result<Vec<Dialect>, TestError> = cache
            .cache_query(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Vec::new())
                },
                &key,
                None,
            )
            .await;
        assert_eq!(second.unwrap(), vec![english()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().snapshot();
        assert_eq!((stats.hits, stats.misses, stats.writes), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_never_caches_empty() {
        let (cache, store) = make_cache(CacheConfig::default());
        let calls = AtomicUsize::new(0);
        let key = active_key();

        for _ in 0..2 {
            let result: Result<Option<Dialect>, TestError> = cache
                .cache_query(
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    },
                    &key,
                    None,
                )
                .await;
            assert_eq!(result.unwrap(), None);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.entry_count().await.unwrap(), 0);
        assert_eq!(cache.stats().snapshot().skipped_empty, 2);
    }

    #[tokio::test]
    async fn test_default_ttl_fallback() {
        let config = CacheConfig::default().with_default_ttl(Duration::from_secs(90));
        let (cache, store) = make_cache(config);
        let key = active_key();

        let _: Result<Dialect, TestError> = cache
            .cache_query(|| async { Ok(english()) }, &key, None)
            .await;
        assert_eq!(store.written_ttl(key.as_str()).await, Some(Duration::from_secs(90)));

        let other = derive_key("dialects", &json!({"status": "x"}), None::<&[&str]>).unwrap();
        let _: Result<Dialect, TestError> = cache
            .cache_query(|| async { Ok(english()) }, &other, Some(Duration::ZERO))
            .await;
        assert_eq!(store.written_ttl(other.as_str()).await, Some(Duration::from_secs(90)));
    }

    #[tokio::test]
    async fn test_explicit_ttl_wins() {
        let (cache, store) = make_cache(CacheConfig::default());
        let key = active_key();

        let _: Result<Dialect, TestError> = cache
            .cache_query(|| async { Ok(english()) }, &key, Some(Duration::from_secs(5)))
            .await;
        assert_eq!(store.written_ttl(key.as_str()).await, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_query_error_propagates_unchanged() {
        let (cache, store) = make_cache(CacheConfig::default());
        let key = active_key();

        let result: Result<Dialect, TestError> = cache
            .cache_query(|| async { Err(TestError::Query("db down")) }, &key, None)
            .await;

        assert_eq!(result.unwrap_err(), TestError::Query("db down"));
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let (cache, store) = make_cache(CacheConfig::default());
        let key = active_key();
        store
            .set(key.as_str(), b"not json", Duration::from_secs(60))
            .await
            .unwrap();

        let result: Result<Dialect, TestError> = cache
            .cache_query(|| async { Ok(english()) }, &key, None)
            .await;
        assert_eq!(result.unwrap(), english());

        let stored = store.get(key.as_str()).await.unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<Dialect>(&stored).unwrap(), english());
        assert_eq!(cache.stats().snapshot().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_passthrough() {
        let (cache, store) = make_cache(CacheConfig::disabled());
        let calls = AtomicUsize::new(0);
        let key = active_key();

        for _ in 0..2 {
            let _: Result<Dialect, TestError> = cache
                .cache_query(
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(english())
                    },
                    &key,
                    None,
                )
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.entry_count().await.unwrap(), 0);
        assert_eq!(cache.invalidate_namespace("dialects").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_namespace_scope() {
        let (cache, store) = make_cache(CacheConfig::default());
        for raw in ["dialects:aaa", "dialects:bbb", "users:ccc"] {
            store.set(raw, b"1", Duration::from_secs(60)).await.unwrap();
        }

        assert_eq!(cache.invalidate_namespace("Dialects").await.unwrap(), 2);
        assert_eq!(store.keys().await, vec!["users:ccc".to_string()]);
        assert_eq!(cache.invalidate_namespace("dialects").await.unwrap(), 0);

        let stats = cache.stats().snapshot();
        assert_eq!(stats.invalidations, 2);
        assert_eq!(stats.keys_invalidated, 2);
    }

    #[tokio::test]
    async fn test_invalidate_namespace_rejects_empty() {
        let (cache, _store) = make_cache(CacheConfig::default());
        assert_eq!(
            cache.invalidate_namespace("  ").await,
            Err(CacheError::Key(KeyError::EmptyNamespace))
        );
    }

    #[tokio::test]
    async fn test_invalidate_key_and_on_write() {
        let (cache, store) = make_cache(CacheConfig::default());
        let key = active_key();
        store.set(key.as_str(), b"1", Duration::from_secs(60)).await.unwrap();
        store.set("dialects:other", b"1", Duration::from_secs(60)).await.unwrap();

        assert!(cache.invalidate_key(&key).await.unwrap());
        assert!(!cache.invalidate_key(&key).await.unwrap());

        let removed = cache.on_write(&WriteEvent::updated("dialects")).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clone_shares_stats() {
        let (cache, _store) = make_cache(CacheConfig::default());
        let clone = cache.clone();
        let _: Result<Dialect, TestError> = clone
            .cache_query(|| async { Ok(english()) }, &active_key(), None)
            .await;
        assert_eq!(cache.stats().misses(), 1);
    }
}
