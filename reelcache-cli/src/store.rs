//! Store selection from the environment.

use std::path::PathBuf;
use std::sync::Arc;

use reelcache_core::{ConfigError, StoreError};
use reelcache_storage::{CacheStore, InMemoryCacheStore, LmdbCacheStore};

pub const ENV_STORE: &str = "REELCACHE_STORE";
pub const ENV_LMDB_PATH: &str = "REELCACHE_LMDB_PATH";
pub const ENV_LMDB_MAX_MB: &str = "REELCACHE_LMDB_MAX_MB";

const DEFAULT_LMDB_PATH: &str = ".reelcache";
const DEFAULT_LMDB_MAX_MB: usize = 256;

/// Which backend to open, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSpec {
    Memory,
    Lmdb { path: PathBuf, max_size_mb: usize },
    Redis,
}

impl StoreSpec {
    /// Read the store selection from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the store selection through `lookup`. LMDB is the default.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let kind = lookup(ENV_STORE).unwrap_or_else(|| "lmdb".to_string());
        match kind.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "lmdb" => {
                let path = lookup(ENV_LMDB_PATH)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LMDB_PATH));
                let max_size_mb = match lookup(ENV_LMDB_MAX_MB) {
                    Some(raw) => raw
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .filter(|mb| *mb > 0)
                        .ok_or_else(|| ConfigError::InvalidValue {
                            field: ENV_LMDB_MAX_MB.to_string(),
                            value: raw.clone(),
                            reason: "must be a positive number of megabytes".to_string(),
                        })?,
                    None => DEFAULT_LMDB_MAX_MB,
                };
                Ok(Self::Lmdb { path, max_size_mb })
            }
            _ => Err(ConfigError::InvalidValue {
                field: ENV_STORE.to_string(),
                value: kind,
                reason: "expected memory, lmdb or redis".to_string(),
            }),
        }
    }

    pub async fn open(&self) -> Result<Arc<dyn CacheStore>, StoreError> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryCacheStore::new())),
            Self::Lmdb { path, max_size_mb } => {
                Ok(Arc::new(LmdbCacheStore::new(path, *max_size_mb)?))
            }
            Self::Redis => open_redis().await,
        }
    }
}

#[cfg(feature = "redis")]
async fn open_redis() -> Result<Arc<dyn CacheStore>, StoreError> {
    let store = reelcache_storage::RedisCacheStore::from_env().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn open_redis() -> Result<Arc<dyn CacheStore>, StoreError> {
    Err(StoreError::unavailable(
        "redis",
        "this build does not include the `redis` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_to_lmdb() {
        let spec = StoreSpec::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            spec,
            StoreSpec::Lmdb {
                path: PathBuf::from(".reelcache"),
                max_size_mb: 256,
            }
        );
    }

    #[test]
    fn test_store_kinds() {
        assert_eq!(
            StoreSpec::from_lookup(lookup(&[(ENV_STORE, "Memory")])).unwrap(),
            StoreSpec::Memory
        );
        assert_eq!(
            StoreSpec::from_lookup(lookup(&[(ENV_STORE, "redis")])).unwrap(),
            StoreSpec::Redis
        );
        assert!(StoreSpec::from_lookup(lookup(&[(ENV_STORE, "memcached")])).is_err());
    }

    #[test]
    fn test_lmdb_settings() {
        let spec = StoreSpec::from_lookup(lookup(&[
            (ENV_LMDB_PATH, "/var/cache/reel"),
            (ENV_LMDB_MAX_MB, "64"),
        ]))
        .unwrap();
        assert_eq!(
            spec,
            StoreSpec::Lmdb {
                path: PathBuf::from("/var/cache/reel"),
                max_size_mb: 64,
            }
        );

        assert!(StoreSpec::from_lookup(lookup(&[(ENV_LMDB_MAX_MB, "0")])).is_err());
        assert!(StoreSpec::from_lookup(lookup(&[(ENV_LMDB_MAX_MB, "lots")])).is_err());
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = StoreSpec::Memory.open().await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
