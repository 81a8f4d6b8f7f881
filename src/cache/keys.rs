//! Cache key derivation.
//!
//! A key is `table:operation:columns`. Filter predicates (`eq`, `in`, `gte`,
//! ...) are deliberately not part of the key, so two reads of the same table
//! and column list share one slot regardless of their filters.

use std::fmt;

/// Separator between key segments. Table-wide invalidation matches on
/// `table` followed by this separator.
pub const KEY_SEPARATOR: char = ':';

/// Operation segment used for every cached read.
pub const SELECT_OPERATION: &str = "select";

/// Deterministic cache key built from `(table, operation, columns)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(table: &str, operation: &str, columns: &str) -> Self {
        Self(format!(
            "{table}{KEY_SEPARATOR}{operation}{KEY_SEPARATOR}{columns}"
        ))
    }

    /// Key for a read of `columns` from `table`.
    pub fn select(table: &str, columns: &str) -> Self {
        Self::new(table, SELECT_OPERATION, columns)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The table segment of the key.
    pub fn table(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map_or(self.0.as_str(), |(table, _)| table)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix shared by every key belonging to `table`.
pub fn table_prefix(table: &str) -> String {
    format!("{table}{KEY_SEPARATOR}")
}
