//! Cache configuration.
//!
//! Configuration is built once at startup (defaults, builder methods or
//! environment variables) and is read-only afterwards.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default TTL applied when a caller does not pass one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

pub const ENV_DEFAULT_TTL_SECS: &str = "REELCACHE_DEFAULT_TTL_SECS";
pub const ENV_READ_POLICY: &str = "REELCACHE_READ_POLICY";
pub const ENV_WRITE_POLICY: &str = "REELCACHE_WRITE_POLICY";
pub const ENV_INVALIDATION_POLICY: &str = "REELCACHE_INVALIDATION_POLICY";
pub const ENV_SINGLE_FLIGHT: &str = "REELCACHE_SINGLE_FLIGHT";
pub const ENV_ENABLED: &str = "REELCACHE_ENABLED";

/// What to do when the cache store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorePolicy {
    /// Log the failure and carry on as if the cache were empty.
    #[default]
    BestEffort,
    /// Return the failure to the caller.
    Strict,
}

impl StorePolicy {
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

impl FromStr for StorePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best-effort" | "best_effort" | "besteffort" => Ok(Self::BestEffort),
            "strict" => Ok(Self::Strict),
            other => Err(ConfigError::InvalidValue {
                field: "store_policy".to_string(),
                value: other.to_string(),
                reason: "expected best-effort or strict".to_string(),
            }),
        }
    }
}

impl fmt::Display for StorePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BestEffort => f.write_str("best-effort"),
            Self::Strict => f.write_str("strict"),
        }
    }
}

/// Configuration for the repository cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when `cache_query` is called without one.
    pub default_ttl: Duration,
    /// Policy for failed store reads.
    pub read_policy: StorePolicy,
    /// Policy for failed store writes after a miss.
    pub write_policy: StorePolicy,
    /// Policy for failed namespace invalidation.
    pub invalidation_policy: StorePolicy,
    /// De-duplicate concurrent misses on the same key.
    pub single_flight: bool,
    /// When false every query runs and the store is never touched.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            read_policy: StorePolicy::BestEffort,
            write_policy: StorePolicy::BestEffort,
            invalidation_policy: StorePolicy::BestEffort,
            single_flight: false,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a disabled (pass-through) cache configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the policy for store reads.
    pub fn with_read_policy(mut self, policy: StorePolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Set the policy for store writes.
    pub fn with_write_policy(mut self, policy: StorePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Set the policy for invalidation.
    pub fn with_invalidation_policy(mut self, policy: StorePolicy) -> Self {
        self.invalidation_policy = policy;
        self
    }

    /// Apply one policy to reads, writes and invalidation.
    pub fn with_policy(self, policy: StorePolicy) -> Self {
        self.with_read_policy(policy)
            .with_write_policy(policy)
            .with_invalidation_policy(policy)
    }

    /// Enable or disable single-flight de-duplication.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Enable or disable the cache.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check invariants that the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl < Duration::from_secs(1) {
            return Err(ConfigError::InvalidValue {
                field: "default_ttl".to_string(),
                value: format!("{:?}", self.default_ttl),
                reason: "TTL must be at least one second".to_string(),
            });
        }
        Ok(())
    }

    /// Create a CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `REELCACHE_DEFAULT_TTL_SECS`: default TTL in seconds (default: 60)
    /// - `REELCACHE_READ_POLICY`: `best-effort` or `strict` (default: best-effort)
    /// - `REELCACHE_WRITE_POLICY`: `best-effort` or `strict` (default: best-effort)
    /// - `REELCACHE_INVALIDATION_POLICY`: `best-effort` or `strict` (default: best-effort)
    /// - `REELCACHE_SINGLE_FLIGHT`: "true" or "false" (default: false)
    /// - `REELCACHE_ENABLED`: "true" or "false" (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let default_ttl = match lookup(ENV_DEFAULT_TTL_SECS) {
            Some(raw) => Duration::from_secs(parse_field(ENV_DEFAULT_TTL_SECS, &raw)?),
            None => defaults.default_ttl,
        };

        let policy = |name: &str, fallback: StorePolicy| -> Result<StorePolicy, ConfigError> {
            match lookup(name) {
                Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                    field: name.to_string(),
                    value: raw.clone(),
                    reason: "expected best-effort or strict".to_string(),
                }),
                None => Ok(fallback),
            }
        };

        let config = Self {
            default_ttl,
            read_policy: policy(ENV_READ_POLICY, defaults.read_policy)?,
            write_policy: policy(ENV_WRITE_POLICY, defaults.write_policy)?,
            invalidation_policy: policy(ENV_INVALIDATION_POLICY, defaults.invalidation_policy)?,
            single_flight: match lookup(ENV_SINGLE_FLIGHT) {
                Some(raw) => parse_bool(ENV_SINGLE_FLIGHT, &raw)?,
                None => defaults.single_flight,
            },
            enabled: match lookup(ENV_ENABLED) {
                Some(raw) => parse_bool(ENV_ENABLED, &raw)?,
                None => defaults.enabled,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_field<T>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
