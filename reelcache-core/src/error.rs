//! Error types for reelcache operations

use thiserror::Error;

/// Key derivation errors.
///
/// These are raised before any store I/O happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Namespace must not be empty")]
    EmptyNamespace,

    #[error("Invalid namespace {namespace}: {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("Filter for namespace {namespace} cannot be serialized: {reason}")]
    Serialization { namespace: String, reason: String },

    #[error("Malformed cache key {key}: {reason}")]
    Malformed { key: String, reason: String },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache store {backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Cache store transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Cache value serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Invalid key pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl StoreError {
    /// Shorthand for a connectivity failure on `backend`.
    pub fn unavailable(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the store could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },
}

/// Master error type for all reelcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for reelcache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_error_display() {
        let err = KeyError::Serialization {
            namespace: "dialects".to_string(),
            reason: "key must be a string".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dialects"));
        assert!(msg.contains("key must be a string"));
    }

    #[test]
    fn test_store_error_unavailable() {
        let err = StoreError::unavailable("redis", "connection refused");
        assert!(err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "Cache store redis unavailable: connection refused"
        );

        let err = StoreError::Transaction {
            reason: "map full".to_string(),
        };
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_cache_error_from_conversions() {
        let err: CacheError = KeyError::EmptyNamespace.into();
        assert!(matches!(err, CacheError::Key(KeyError::EmptyNamespace)));

        let err: CacheError = StoreError::unavailable("memory", "down").into();
        assert!(matches!(err, CacheError::Store(_)));
        assert!(err.to_string().starts_with("Store error:"));
    }
}
