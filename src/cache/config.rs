//! Client configuration.
//!
//! Fixed at [`Client`](crate::client::Client) construction and never changed
//! afterwards; the cache can only be affected through the explicit
//! clear/invalidate surface.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 1000;
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Middleware configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Serve repeated reads from the in-memory cache.
    pub enable_query_cache: bool,
    /// Record spans, metrics and slow-call warnings.
    pub enable_performance_monitoring: bool,
    /// Lifetime (ms) of a cached read result.
    pub default_cache_ttl_ms: u64,
    /// Calls slower than this (ms) emit a warning.
    pub slow_query_threshold_ms: u64,
    /// Maximum cached entries before least-recently-used eviction.
    pub max_entries: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            enable_query_cache: true,
            enable_performance_monitoring: true,
            default_cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_THRESHOLD_MS,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl From<&crate::config::CacheSettings> for ClientConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enable_query_cache: settings.enable_query_cache,
            enable_performance_monitoring: settings.enable_performance_monitoring,
            default_cache_ttl_ms: settings.default_cache_ttl.as_millis() as u64,
            slow_query_threshold_ms: settings.slow_query_threshold.as_millis() as u64,
            max_entries: settings.max_entries.get(),
        }
    }
}

impl ClientConfig {
    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.default_cache_ttl_ms)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
