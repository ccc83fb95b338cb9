//! Deterministic cache key derivation.
//!
//! A key has the shape `<namespace>:<digest>` where the digest is the hex
//! SHA-256 of the canonical filter JSON, optionally followed by `:` and the
//! projected field names joined by `:`. Keys only depend on their inputs, so
//! the same query maps to the same key across processes and restarts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::KeyError;
use crate::pattern;

/// Separator between the namespace and the digest.
pub const KEY_SEPARATOR: char = ':';

/// Length of the hex digest part of a derived key.
pub const DIGEST_HEX_LEN: usize = 64;

/// A logical group of cache keys, usually a collection name.
///
/// Namespaces are trimmed and lowercased on construction so that
/// `"Dialects"` and `"dialects "` address the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Normalize and validate a namespace.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, KeyError> {
        let normalized = raw.as_ref().trim().to_lowercase();
        if normalized.is_empty() {
            return Err(KeyError::EmptyNamespace);
        }
        if normalized.contains(KEY_SEPARATOR) {
            return Err(KeyError::InvalidNamespace {
                namespace: normalized,
                reason: format!("must not contain '{}'", KEY_SEPARATOR),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<namespace>:`, the prefix shared by every key in this namespace.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.0, KEY_SEPARATOR)
    }

    /// Glob pattern selecting every key in this namespace.
    pub fn pattern(&self) -> String {
        format!("{}*", pattern::escape(&self.prefix()))
    }
}

impl TryFrom<String> for Namespace {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Namespace {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully qualified cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse an existing key string.
    ///
    /// Only the shape is checked (a non-empty namespace before the first
    /// separator), so keys written by other producers can be addressed too.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, KeyError> {
        let trimmed = raw.as_ref().trim();
        match trimmed.split_once(KEY_SEPARATOR) {
            Some((ns, _)) if !ns.is_empty() => Ok(Self(trimmed.to_string())),
            _ => Err(KeyError::Malformed {
                key: trimmed.to_string(),
                reason: "expected <namespace>:<digest>".to_string(),
            }),
        }
    }

    /// Build a key from a namespace and an already computed suffix.
    pub fn from_parts(namespace: &Namespace, suffix: &str) -> Self {
        Self(format!("{}{}", namespace.prefix(), suffix.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace part of the key.
    pub fn namespace(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map(|(ns, _)| ns)
            .unwrap_or(&self.0)
    }

    /// Everything after the namespace separator.
    pub fn digest(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map(|(_, digest)| digest)
            .unwrap_or("")
    }

    /// Returns true if this key belongs to `namespace`.
    pub fn belongs_to(&self, namespace: &Namespace) -> bool {
        self.0.starts_with(&namespace.prefix())
    }
}

impl TryFrom<String> for CacheKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize `filter` to JSON with object keys sorted at every depth.
///
/// Two filters that differ only in field insertion order serialize to the
/// same string; any difference in content gives a different string.
pub fn canonical_json<F>(filter: &F) -> Result<String, serde_json::Error>
where
    F: Serialize + ?Sized,
{
    let value = serde_json::to_value(filter)?;
    serde_json::to_string(&canonicalize(value))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Derive the cache key for a query.
///
/// `projection` keeps its order: `["name", "id"]` and `["id", "name"]` are
/// different keys. `Some(&[])` is distinct from `None`.
pub fn derive_key<F, P>(
    namespace: &str,
    filter: &F,
    projection: Option<&[P]>,
) -> Result<CacheKey, KeyError>
where
    F: Serialize + ?Sized,
    P: AsRef<str>,
{
    let namespace = Namespace::new(namespace)?;
    derive_key_in(&namespace, filter, projection)
}

/// [`derive_key`] for an already validated namespace.
pub fn derive_key_in<F, P>(
    namespace: &Namespace,
    filter: &F,
    projection: Option<&[P]>,
) -> Result<CacheKey, KeyError>
where
    F: Serialize + ?Sized,
    P: AsRef<str>,
{
    let mut material = canonical_json(filter).map_err(|e| KeyError::Serialization {
        namespace: namespace.to_string(),
        reason: e.to_string(),
    })?;

    if let Some(fields) = projection {
        material.push(KEY_SEPARATOR);
        let joined = fields
            .iter()
            .map(|f| f.as_ref())
            .collect::<Vec<_>>()
            .join(":");
        material.push_str(&joined);
    }

    let digest = Sha256::digest(material.as_bytes());
    Ok(CacheKey::from_parts(namespace, &hex::encode(digest)))
}
