//! reelcache core - keys, patterns, configuration and errors
//!
//! Everything in this crate is pure: no I/O and no async. The store
//! implementations and the read-through executor live in
//! `reelcache-storage`.

pub mod config;
pub mod error;
pub mod key;
pub mod pattern;
pub mod value;

pub use config::{CacheConfig, StorePolicy, DEFAULT_TTL};
pub use error::{CacheError, CacheResult, ConfigError, KeyError, StoreError};
pub use key::{canonical_json, derive_key, derive_key_in, CacheKey, Namespace};
pub use pattern::KeyPattern;
pub use value::CacheValue;
