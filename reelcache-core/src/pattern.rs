//! Redis-style glob patterns for bulk key deletion.
//!
//! In-process stores have no `KEYS` command, so patterns are compiled to an
//! anchored regex that matches the same keys Redis would.
//!
//! Supported syntax: `*` (any run of characters), `?` (exactly one
//! character), `[abc]` / `[^abc]` / `[a-z]` classes and `\` escapes.

use regex::Regex;

use crate::error::StoreError;

const GLOB_META: &[char] = &['*', '?', '[', ']', '\\'];

/// A compiled key pattern.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    literal_prefix: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut re = String::with_capacity(pattern.len() * 2 + 8);
        re.push_str("(?s)^");

        let mut literal_prefix = String::new();
        let mut in_prefix = true;
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    in_prefix = false;
                    re.push_str(".*");
                }
                '?' => {
                    in_prefix = false;
                    re.push('.');
                }
                '\\' => {
                    let escaped = chars.next().unwrap_or('\\');
                    if in_prefix {
                        literal_prefix.push(escaped);
                    }
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
                '[' => {
                    in_prefix = false;
                    let mut class = String::from("[");
                    if matches!(chars.peek(), Some('^') | Some('!')) {
                        chars.next();
                        class.push('^');
                    }
                    let mut members = 0usize;
                    let mut closed = false;
                    while let Some(member) = chars.next() {
                        match member {
                            ']' => {
                                closed = true;
                                break;
                            }
                            '\\' => {
                                if let Some(escaped) = chars.next() {
                                    class.push_str(&regex::escape(&escaped.to_string()));
                                    members += 1;
                                }
                            }
                            '-' if members > 0 && chars.peek().is_some_and(|n| *n != ']') => {
                                class.push('-');
                            }
                            other => {
                                class.push_str(&regex::escape(&other.to_string()));
                                members += 1;
                            }
                        }
                    }
                    if !closed {
                        return Err(invalid("unterminated character class"));
                    }
                    if members == 0 {
                        return Err(invalid("empty character class"));
                    }
                    class.push(']');
                    re.push_str(&class);
                }
                other => {
                    if in_prefix {
                        literal_prefix.push(other);
                    }
                    re.push_str(&regex::escape(&other.to_string()));
                }
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            source: pattern.to_string(),
            literal_prefix,
            regex,
        })
    }

    /// Pattern matching every key that starts with `prefix` literally.
    pub fn prefix(prefix: &str) -> Result<Self, StoreError> {
        Self::new(&format!("{}*", escape(prefix)))
    }

    /// Returns true if `key` matches this pattern.
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.literal_prefix) && self.regex.is_match(key)
    }

    /// The leading literal part of the pattern, before any wildcard.
    ///
    /// Every matching key starts with this string, so ordered stores can
    /// restrict their scan to it.
    pub fn literal_prefix(&self) -> &str {
        &self.literal_prefix
    }

    /// The original glob text.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Escape glob metacharacters so `literal` only matches itself.
pub fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if GLOB_META.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
