//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cache entries in a
//! memory-mapped file, so a warm cache survives process restarts on the same
//! host.
//!
//! # Value Layout
//!
//! `[expires_at: i64 little-endian unix millis][payload bytes]`
//!
//! LMDB has no native expiry. Expired entries are treated as absent and
//! removed when they are read or matched by a pattern delete.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions, every
//! mutation runs in its own write transaction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use reelcache_core::{KeyPattern, StoreError};
use tracing::debug;

use super::CacheStore;

const HEADER_LEN: usize = 8;

/// Why an LMDB cache directory could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    #[error("cache directory {path} is not usable: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("map size of {mb} MB is not usable")]
    MapSize { mb: usize },

    #[error("cannot map {path}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: heed::Error,
    },

    #[error("cannot create the entry table in {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: heed::Error,
    },
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::unavailable("lmdb", e)
    }
}

fn txn_error(e: heed::Error) -> StoreError {
    StoreError::Transaction {
        reason: e.to_string(),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn encode_value(value: &[u8], ttl: Duration) -> Vec<u8> {
    let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expires_at = now_millis().saturating_add(ttl_millis);

    let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.extend_from_slice(value);
    bytes
}

/// Split a stored record into (expires_at millis, payload).
///
/// Records shorter than the header are treated as already expired.
fn decode_value(bytes: &[u8]) -> (i64, &[u8]) {
    match bytes.get(..HEADER_LEN).and_then(|h| <[u8; 8]>::try_from(h).ok()) {
        Some(header) => (i64::from_le_bytes(header), &bytes[HEADER_LEN..]),
        None => (i64::MIN, &[][..]),
    }
}

/// Cache store over a single unnamed LMDB table.
///
/// Keys are the cache keys as UTF-8. Values are the expiry header followed
/// by the payload (see the module docs).
///
/// # Example
///
/// ```ignore
/// use reelcache_storage::LmdbCacheStore;
///
/// let store = LmdbCacheStore::new("/var/cache/reelcache", 256)?;
/// store.set("videos:abc", b"...", Duration::from_secs(60)).await?;
/// ```
pub struct LmdbCacheStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbCacheStore {
    /// Open (or create) a cache under `path`.
    ///
    /// `max_size_mb` caps the memory map. Every record carries its 8-byte
    /// expiry header, and expired records only leave the file when they are
    /// read or swept by a pattern delete, so a cache that is rarely
    /// invalidated needs headroom for entries that have lapsed but not yet
    /// been evicted. Once the map is full, writes fail with a store error
    /// and the read-through cache falls back to its write policy.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let path = path.as_ref();
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .filter(|bytes| *bytes > 0)
            .ok_or(LmdbStoreError::MapSize { mb: max_size_mb })?;

        std::fs::create_dir_all(path).map_err(|source| LmdbStoreError::Directory {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: the environment is opened once per directory by this
        // process and never mapped twice.
        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(1).open(path) }
            .map_err(|source| LmdbStoreError::Map {
                path: path.to_path_buf(),
                source,
            })?;

        let table = |source| LmdbStoreError::Table {
            path: path.to_path_buf(),
            source,
        };
        let mut wtxn = env.write_txn().map_err(table)?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, None).map_err(table)?;
        wtxn.commit().map_err(table)?;

        debug!(path = %path.display(), max_size_mb, "opened lmdb cache");
        Ok(Self { env, db })
    }

    /// Collect keys matching `pattern` along with whether each is still live.
    fn collect_matching(&self, pattern: &KeyPattern) -> Result<Vec<(Vec<u8>, bool)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let now = now_millis();
        let prefix = pattern.literal_prefix().as_bytes();

        let mut matched = Vec::new();
        for item in self.db.iter(&rtxn).map_err(txn_error)? {
            let Ok((key, value)) = item else { continue };
            if !key.starts_with(prefix) {
                continue;
            }
            let Ok(key_str) = std::str::from_utf8(key) else {
                continue;
            };
            if pattern.matches(key_str) {
                let (expires_at, _) = decode_value(value);
                matched.push((key.to_vec(), expires_at > now));
            }
        }

        Ok(matched)
    }

    fn remove_expired(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let still_expired = match self.db.get(&wtxn, key).map_err(txn_error)? {
            Some(bytes) => decode_value(bytes).0 <= now_millis(),
            None => false,
        };
        if still_expired {
            self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    fn backend_name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let expired = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)? {
                Some(bytes) => {
                    let (expires_at, payload) = decode_value(bytes);
                    if expires_at > now_millis() {
                        return Ok(Some(payload.to_vec()));
                    }
                    true
                }
                None => false,
            }
        };

        if expired {
            debug!(key, "evicting expired lmdb entry");
            self.remove_expired(key.as_bytes())?;
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let record = encode_value(value, ttl);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &record)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let live = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_error)? {
            Some(bytes) => decode_value(bytes).0 > now_millis(),
            None => false,
        };
        self.db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(live)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let pattern = KeyPattern::new(pattern)?;
        let matched = self.collect_matching(&pattern)?;
        if matched.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for (key, live) in &matched {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? && *live {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        Ok(deleted)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let Some(bytes) = self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)? else {
            return Ok(None);
        };
        let remaining = decode_value(bytes).0.saturating_sub(now_millis());
        if remaining <= 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_millis(remaining as u64)))
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let now = now_millis();
        let mut count = 0u64;
        for item in self.db.iter(&rtxn).map_err(txn_error)? {
            let (_, value) = item.map_err(txn_error)?;
            if decode_value(value).0 > now {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINUTE: Duration = Duration::from_secs(60);

    fn create_test_store() -> (LmdbCacheStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbCacheStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[test]
    fn test_zero_map_size_is_rejected() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let err = LmdbCacheStore::new(temp_dir.path(), 0).err().expect("zero map size must fail");
        assert!(matches!(err, LmdbStoreError::MapSize { mb: 0 }));
        assert!(StoreError::from(err).is_unavailable());
    }

    #[test]
    fn test_file_in_place_of_directory_is_reported() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let blocker = temp_dir.path().join("cache");
        std::fs::write(&blocker, b"not a directory").expect("write should succeed");

        let err = LmdbCacheStore::new(&blocker, 10).err().expect("open must fail");
        match err {
            LmdbStoreError::Directory { path, .. } => assert_eq!(path, blocker),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_value_layout() {
        let record = encode_value(b"abc", MINUTE);
        assert_eq!(record.len(), HEADER_LEN + 3);
        let (expires_at, payload) = decode_value(&record);
        assert_eq!(payload, b"abc");
        assert!(expires_at > now_millis());

        let (expires_at, payload) = decode_value(&[1, 2, 3]);
        assert_eq!(expires_at, i64::MIN);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.get("videos:1").await.unwrap(), None);

        store.set("videos:1", br#"{"id":1}"#, MINUTE).await.unwrap();
        assert_eq!(
            store.get("videos:1").await.unwrap().as_deref(),
            Some(&br#"{"id":1}"#[..])
        );

        let ttl = store.ttl("videos:1").await.unwrap().expect("ttl should exist");
        assert!(ttl <= MINUTE && ttl > Duration::from_secs(50));
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let (store, _dir) = create_test_store();
        store.set("videos:1", b"old", MINUTE).await.unwrap();
        store.set("videos:1", b"new", MINUTE).await.unwrap();
        assert_eq!(
            store.get("videos:1").await.unwrap().as_deref(),
            Some(&b"new"[..])
        );
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_evicted() {
        let (store, _dir) = create_test_store();
        store
            .set("videos:1", b"x", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get("videos:1").await.unwrap(), None);
        assert_eq!(store.ttl("videos:1").await.unwrap(), None);
        assert!(!store.delete("videos:1").await.unwrap());
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_pattern_scope() {
        let (store, _dir) = create_test_store();
        for key in ["dialects:aaa", "dialects:bbb", "users:ccc"] {
            store.set(key, b"x", MINUTE).await.unwrap();
        }

        assert_eq!(store.delete_by_pattern("dialects:*").await.unwrap(), 2);
        assert_eq!(store.get("dialects:aaa").await.unwrap(), None);
        assert_eq!(store.get("dialects:bbb").await.unwrap(), None);
        assert!(store.get("users:ccc").await.unwrap().is_some());

        assert_eq!(store.delete_by_pattern("dialects:*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_single_key() {
        let (store, _dir) = create_test_store();
        store.set("users:1", b"x", MINUTE).await.unwrap();
        assert!(store.delete("users:1").await.unwrap());
        assert!(!store.delete("users:1").await.unwrap());
    }
}
