//! reelcache Test Utilities
//!
//! Shared test infrastructure for the reelcache workspace:
//! - Proptest generators for namespaces, filters and TTLs
//! - A sample `Dialect` entity with fixtures
//! - Mock stores, queries and repositories

pub use reelcache_core::{
    derive_key, CacheConfig, CacheError, CacheKey, CacheResult, CacheValue, KeyError, Namespace,
    StoreError, StorePolicy,
};
pub use reelcache_storage::{CacheStore, InMemoryCacheStore, Repository, RepositoryCache};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

// ============================================================================
// SAMPLE ENTITY
// ============================================================================

/// A language dialect row, the entity most tests cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub status: String,
}

impl CacheValue for Dialect {}

impl Dialect {
    pub fn new(code: impl Into<String>, name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            code: code.into(),
            name: name.into(),
            status: status.into(),
        }
    }
}

/// Equality filter over dialects. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl DialectFilter {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, dialect: &Dialect) -> bool {
        self.code.as_ref().map_or(true, |c| *c == dialect.code)
            && self.status.as_ref().map_or(true, |s| *s == dialect.status)
    }
}

/// Partial update for dialects.
#[derive(Debug, Clone, Default)]
pub struct DialectPatch {
    pub name: Option<String>,
    pub status: Option<String>,
}

/// Error type used by the mocks: a query failure or a cache failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MockError {
    #[error("query failed: {0}")]
    Query(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for reelcache inputs.

    use super::*;
    use proptest::prelude::*;

    /// A valid, already-normalized namespace.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// A namespace with random case and surrounding whitespace.
    pub fn arb_raw_namespace() -> impl Strategy<Value = String> {
        ("[ ]{0,2}", "[a-zA-Z][a-zA-Z0-9_]{0,15}", "[ ]{0,2}")
            .prop_map(|(lead, name, trail)| format!("{lead}{name}{trail}"))
    }

    /// A scalar JSON value.
    pub fn arb_scalar() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(serde_json::Value::from),
        ]
    }

    /// A flat filter object with up to six fields.
    pub fn arb_filter() -> impl Strategy<Value = serde_json::Value> {
        prop::collection::btree_map("[a-z_]{1,8}", arb_scalar(), 0..6).prop_map(|fields| {
            serde_json::Value::Object(fields.into_iter().collect())
        })
    }

    /// A projection field list.
    pub fn arb_projection() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z_]{1,8}", 0..5)
    }

    /// A TTL between one second and a day.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..86_400).prop_map(Duration::from_secs)
    }

    pub fn arb_dialect() -> impl Strategy<Value = Dialect> {
        (
            any::<[u8; 16]>(),
            "[a-z]{2}",
            "[A-Z][a-z]{2,10}",
            prop_oneof![Just("active"), Just("retired")],
        )
            .prop_map(|(id, code, name, status)| Dialect {
                id: Uuid::from_bytes(id),
                code,
                name,
                status: status.to_string(),
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use std::sync::Arc;

    pub fn english() -> Dialect {
        Dialect::new("en", "English", "active")
    }

    pub fn french() -> Dialect {
        Dialect::new("fr", "French", "active")
    }

    pub fn latin() -> Dialect {
        Dialect::new("la", "Latin", "retired")
    }

    /// Two active dialects and one retired.
    pub fn dialects() -> Vec<Dialect> {
        vec![english(), french(), latin()]
    }

    /// A repository cache over a fresh in-memory store.
    pub fn memory_cache(
        config: CacheConfig,
    ) -> (RepositoryCache<InMemoryCacheStore>, Arc<InMemoryCacheStore>) {
        let store = Arc::new(InMemoryCacheStore::new());
        (RepositoryCache::new(Arc::clone(&store), config), store)
    }

    /// A repository cache over a [`FlakyStore`].
    pub fn flaky_cache(config: CacheConfig) -> (RepositoryCache<FlakyStore>, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::new());
        (RepositoryCache::new(Arc::clone(&store), config), store)
    }
}

// ============================================================================
// MOCK STORE
// ============================================================================

/// In-memory store that can be switched offline and records every write.
#[derive(Debug)]
pub struct FlakyStore {
    inner: InMemoryCacheStore,
    available: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
    deletes: AtomicUsize,
    writes: Mutex<Vec<(String, Duration)>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryCacheStore::new(),
            available: AtomicBool::new(true),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Make every call fail with [`StoreError::Unavailable`] until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Every successful `set`, in order, as `(key, ttl)`.
    pub async fn writes(&self) -> Vec<(String, Duration)> {
        self.writes.lock().await.clone()
    }

    /// The underlying store, bypassing the availability switch.
    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("flaky", "store switched off"))
        }
    }
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(key, value, ttl).await?;
        self.writes.lock().await.push((key.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.delete_by_pattern(pattern).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.entry_count().await
    }
}

// ============================================================================
// MOCK QUERIES
// ============================================================================

/// A query that counts how often it runs and returns a fixed outcome.
#[derive(Debug)]
pub struct CountingQuery<T> {
    outcome: Result<T, MockError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl<T: Clone> CountingQuery<T> {
    pub fn new(value: T) -> Self {
        Self {
            outcome: Ok(value),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            outcome: Err(MockError::Query(reason.into())),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn run(&self) -> Result<T, MockError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

// ============================================================================
// MOCK REPOSITORY
// ============================================================================

/// Dialect repository backed by a vector. Counts reads and writes.
#[derive(Debug)]
pub struct MockRepository {
    namespace: String,
    rows: RwLock<Vec<Dialect>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MockRepository {
    pub fn new(namespace: impl Into<String>, rows: Vec<Dialect>) -> Self {
        Self {
            namespace: namespace.into(),
            rows: RwLock::new(rows),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of read queries that reached this repository.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn matching(&self, filter: &DialectFilter) -> Vec<Dialect> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.rows
            .read()
            .await
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Repository for MockRepository {
    type Entity = Dialect;
    type Filter = DialectFilter;
    type Patch = DialectPatch;
    type Error = MockError;

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn find_many(&self, filter: &DialectFilter) -> Result<Vec<Dialect>, MockError> {
        Ok(self.matching(filter).await)
    }

    async fn find_one(&self, filter: &DialectFilter) -> Result<Option<Dialect>, MockError> {
        Ok(self.matching(filter).await.into_iter().next())
    }

    async fn count(&self, filter: &DialectFilter) -> Result<u64, MockError> {
        Ok(self.matching(filter).await.len() as u64)
    }

    async fn insert(&self, entity: Dialect) -> Result<Dialect, MockError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows.write().await.push(entity.clone());
        Ok(entity)
    }

    async fn update(&self, filter: &DialectFilter, patch: DialectPatch) -> Result<u64, MockError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for row in rows.iter_mut().filter(|d| filter.matches(d)) {
            if let Some(name) = &patch.name {
                row.name = name.clone();
            }
            if let Some(status) = &patch.status {
                row.status = status.clone();
            }
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete(&self, filter: &DialectFilter) -> Result<u64, MockError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|d| !filter.matches(d));
        Ok((before - rows.len()) as u64)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache-specific error shapes.

    use super::*;

    /// Assert that a result failed because the store was unavailable.
    #[track_caller]
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &Result<T, MockError>) {
        match result {
            Err(MockError::Cache(CacheError::Store(e))) if e.is_unavailable() => {}
            other => panic!("Expected unavailable store error, got: {:?}", other),
        }
    }

    /// Assert that a key is namespaced and carries a full digest.
    #[track_caller]
    pub fn assert_well_formed_key(key: &CacheKey, namespace: &str) {
        assert_eq!(key.namespace(), namespace, "wrong namespace in {key}");
        let digest = key.digest().split(':').next().unwrap_or_default();
        assert_eq!(
            digest.len(),
            reelcache_core::key::DIGEST_HEX_LEN,
            "digest of {key} is not a SHA-256 hex string"
        );
        assert!(
            digest.chars().all(|c| c.is_ascii_hexdigit()),
            "digest of {key} is not hex"
        );
    }
}
