//! Repository trait and a caching decorator for it.
//!
//! [`CachedRepository`] wraps any [`Repository`]: reads go through the
//! read-through cache under the repository's namespace, writes go to the
//! inner repository and then invalidate that namespace.

use std::time::Duration;

use async_trait::async_trait;
use reelcache_core::{derive_key, CacheError, CacheKey, CacheValue};
use serde::Serialize;

use crate::invalidation::WriteEvent;
use crate::read_through::RepositoryCache;
use crate::store::CacheStore;

/// A data-access object for one collection.
#[async_trait]
pub trait Repository: Send + Sync {
    type Entity: CacheValue;
    type Filter: Serialize + Send + Sync;
    type Patch: Send;
    type Error: From<CacheError> + Send;

    /// Namespace cached reads of this repository are stored under.
    fn namespace(&self) -> &str;

    async fn find_many(&self, filter: &Self::Filter) -> Result<Vec<Self::Entity>, Self::Error>;

    async fn find_one(&self, filter: &Self::Filter)
        -> Result<Option<Self::Entity>, Self::Error>;

    async fn count(&self, filter: &Self::Filter) -> Result<u64, Self::Error>;

    async fn insert(&self, entity: Self::Entity) -> Result<Self::Entity, Self::Error>;

    /// Apply `patch` to every entity matching `filter`. Returns rows changed.
    async fn update(&self, filter: &Self::Filter, patch: Self::Patch)
        -> Result<u64, Self::Error>;

    /// Returns rows removed.
    async fn delete(&self, filter: &Self::Filter) -> Result<u64, Self::Error>;
}

/// The read operation is part of the key so `find_one` and `count` over the
/// same filter do not share an entry.
#[derive(Serialize)]
struct QueryShape<'a, F> {
    op: &'static str,
    filter: &'a F,
}

/// A [`Repository`] whose reads are cached.
pub struct CachedRepository<R, S: ?Sized> {
    inner: R,
    cache: RepositoryCache<S>,
    ttl: Option<Duration>,
}

impl<R, S> CachedRepository<R, S>
where
    R: Repository,
    S: CacheStore + ?Sized,
{
    pub fn new(inner: R, cache: RepositoryCache<S>) -> Self {
        Self {
            inner,
            cache,
            ttl: None,
        }
    }

    /// TTL for this repository's entries instead of the cache default.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn cache(&self) -> &RepositoryCache<S> {
        &self.cache
    }

    fn key(&self, op: &'static str, filter: &R::Filter) -> Result<CacheKey, R::Error> {
        let shape = QueryShape { op, filter };
        derive_key(self.inner.namespace(), &shape, None::<&[&str]>)
            .map_err(|e| CacheError::from(e).into())
    }

    async fn invalidate(&self, event: WriteEvent) -> Result<(), R::Error> {
        self.cache.on_write(&event).await?;
        Ok(())
    }
}

#[async_trait]
impl<R, S> Repository for CachedRepository<R, S>
where
    R: Repository,
    S: CacheStore + ?Sized,
{
    type Entity = R::Entity;
    type Filter = R::Filter;
    type Patch = R::Patch;
    type Error = R::Error;

    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    async fn find_many(&self, filter: &Self::Filter) -> Result<Vec<Self::Entity>, Self::Error> {
        let key = self.key("find_many", filter)?;
        self.cache
            .cache_query(|| self.inner.find_many(filter), &key, self.ttl)
            .await
    }

    async fn find_one(
        &self,
        filter: &Self::Filter,
    ) -> Result<Option<Self::Entity>, Self::Error> {
        let key = self.key("find_one", filter)?;
        self.cache
            .cache_query(|| self.inner.find_one(filter), &key, self.ttl)
            .await
    }

    async fn count(&self, filter: &Self::Filter) -> Result<u64, Self::Error> {
        let key = self.key("count", filter)?;
        self.cache
            .cache_query(|| self.inner.count(filter), &key, self.ttl)
            .await
    }

    async fn insert(&self, entity: Self::Entity) -> Result<Self::Entity, Self::Error> {
        let created = self.inner.insert(entity).await?;
        self.invalidate(WriteEvent::created(self.inner.namespace()))
            .await?;
        Ok(created)
    }

    async fn update(
        &self,
        filter: &Self::Filter,
        patch: Self::Patch,
    ) -> Result<u64, Self::Error> {
        let changed = self.inner.update(filter, patch).await?;
        if changed > 0 {
            self.invalidate(WriteEvent::updated(self.inner.namespace()))
                .await?;
        }
        Ok(changed)
    }

    async fn delete(&self, filter: &Self::Filter) -> Result<u64, Self::Error> {
        let removed = self.inner.delete(filter).await?;
        if removed > 0 {
            self.invalidate(WriteEvent::deleted(self.inner.namespace()))
                .await?;
        }
        Ok(removed)
    }
}
