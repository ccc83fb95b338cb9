//! In-process cache store with TTL.
//!
//! Expired entries are dropped lazily when they are read, and in bulk by
//! [`InMemoryCacheStore::purge_expired`]. Time comes from `tokio::time`, so
//! tests can pause and advance the clock.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reelcache_core::{KeyPattern, StoreError};
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::CacheStore;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
    ttl: Duration,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// HashMap-backed store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The TTL a live entry was written with.
    pub async fn written_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.ttl)
    }

    /// All live keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Remove everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: evict unless a writer replaced it in the meantime.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let entry = MemoryEntry {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl,
            ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let pattern = KeyPattern::new(pattern)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let mut deleted = 0u64;
        entries.retain(|key, entry| {
            if !pattern.matches(key) {
                return true;
            }
            if !entry.is_expired(now) {
                deleted += 1;
            }
            false
        });

        Ok(deleted)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at.saturating_duration_since(now)))
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let count = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(count as u64)
    }
}
