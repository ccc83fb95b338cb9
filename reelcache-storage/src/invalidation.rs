//! Write events and the invalidators that react to them.
//!
//! Invalidation is namespace-wide: any write to a namespace evicts every
//! cached query in it, whatever the filter.

use async_trait::async_trait;
use reelcache_core::CacheResult;
use serde::{Deserialize, Serialize};

use crate::read_through::RepositoryCache;
use crate::store::CacheStore;

/// A write that makes cached reads of a namespace stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteEvent {
    Created { namespace: String },
    Updated { namespace: String },
    Deleted { namespace: String },
    /// A multi-row write, e.g. an import.
    Bulk { namespace: String, affected: u64 },
}

impl WriteEvent {
    pub fn created(namespace: impl Into<String>) -> Self {
        Self::Created {
            namespace: namespace.into(),
        }
    }

    pub fn updated(namespace: impl Into<String>) -> Self {
        Self::Updated {
            namespace: namespace.into(),
        }
    }

    pub fn deleted(namespace: impl Into<String>) -> Self {
        Self::Deleted {
            namespace: namespace.into(),
        }
    }

    pub fn bulk(namespace: impl Into<String>, affected: u64) -> Self {
        Self::Bulk {
            namespace: namespace.into(),
            affected,
        }
    }

    /// The namespace the write touched.
    pub fn namespace(&self) -> &str {
        match self {
            Self::Created { namespace }
            | Self::Updated { namespace }
            | Self::Deleted { namespace }
            | Self::Bulk { namespace, .. } => namespace,
        }
    }
}

/// Something that can evict cached reads after a write.
#[async_trait]
pub trait Invalidator: Send + Sync {
    /// Evict whatever `event` made stale. Returns the number of keys removed.
    async fn invalidate(&self, event: &WriteEvent) -> CacheResult<u64>;

    /// Check if the invalidator does anything.
    fn is_enabled(&self) -> bool;
}

#[async_trait]
impl<S> Invalidator for RepositoryCache<S>
where
    S: CacheStore + ?Sized,
{
    async fn invalidate(&self, event: &WriteEvent) -> CacheResult<u64> {
        self.on_write(event).await
    }

    fn is_enabled(&self) -> bool {
        self.config().enabled
    }
}

/// An invalidator that does nothing, for repositories without a cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpInvalidator;

#[async_trait]
impl Invalidator for NoOpInvalidator {
    async fn invalidate(&self, _event: &WriteEvent) -> CacheResult<u64> {
        Ok(0)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCacheStore;
    use reelcache_core::CacheConfig;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_event_namespace() {
        assert_eq!(WriteEvent::created("videos").namespace(), "videos");
        assert_eq!(WriteEvent::deleted("users").namespace(), "users");
        assert_eq!(WriteEvent::bulk("dialects", 40).namespace(), "dialects");
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(WriteEvent::bulk("dialects", 3)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "bulk", "namespace": "dialects", "affected": 3})
        );
    }

    #[tokio::test]
    async fn test_noop_invalidator() {
        let invalidator = NoOpInvalidator;
        assert_eq!(invalidator.invalidate(&WriteEvent::updated("users")).await, Ok(0));
        assert!(!invalidator.is_enabled());
    }

    #[tokio::test]
    async fn test_cache_as_invalidator() {
        let store = Arc::new(InMemoryCacheStore::new());
        store.set("videos:a", b"1", Duration::from_secs(60)).await.unwrap();
        store.set("videos:b", b"1", Duration::from_secs(60)).await.unwrap();

        let invalidator: Box<dyn Invalidator> = Box::new(RepositoryCache::new(
            Arc::clone(&store) as Arc<dyn CacheStore>,
            CacheConfig::default(),
        ));

        assert!(invalidator.is_enabled());
        assert_eq!(invalidator.invalidate(&WriteEvent::created("videos")).await, Ok(2));
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }
}
