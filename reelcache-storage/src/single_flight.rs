//! Per-key in-flight table for de-duplicating concurrent misses.
//!
//! Each key that currently has a miss being computed maps to an async mutex.
//! The first caller takes the lock and runs the query; later callers wait on
//! the same lock and then re-read the store. Entries are removed as soon as
//! nobody holds or waits on them.

use std::sync::Arc;

use dashmap::DashMap;
use reelcache_core::CacheKey;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    locks: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl InFlight {
    /// Wait for exclusive ownership of `key`.
    pub(crate) async fn acquire(&self, key: &CacheKey) -> Flight<'_> {
        let lock = Arc::clone(&self.locks.entry(key.clone()).or_default());

        let (guard, waited) = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => (guard, false),
            Err(_) => (Arc::clone(&lock).lock_owned().await, true),
        };

        Flight {
            table: self,
            key: key.clone(),
            lock: Some(lock),
            guard: Some(guard),
            waited,
        }
    }

    /// Number of keys with a miss in progress.
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Ownership of one key in the in-flight table. Released on drop.
pub(crate) struct Flight<'a> {
    table: &'a InFlight,
    key: CacheKey,
    lock: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
    waited: bool,
}

impl Flight<'_> {
    /// True if another caller held the key when this one arrived.
    pub(crate) fn waited(&self) -> bool {
        self.waited
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();
        self.table
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
