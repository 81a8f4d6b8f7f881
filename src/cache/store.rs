//! In-memory TTL cache with table-prefix invalidation.
//!
//! One process-wide store guarded by a single mutex. Expiry is lazy: an entry
//! past its TTL is purged by the `get` that observes it. Capacity is bounded
//! with least-recently-used eviction.
//!
//! Every invalidation bumps a per-table generation. A read snapshots the
//! generation before calling the backend and stores its result with
//! [`CacheStore::put_if_current`], so a result fetched before a write can
//! never land in the cache after that write's invalidation.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use metrics::gauge;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::instrument::metrics::METRIC_CACHE_ENTRIES;
use crate::upstream::QueryResponse;

use super::config::ClientConfig;
use super::keys::table_prefix;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

/// A cached read result.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Point-in-time view of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub keys: Vec<String>,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted: u64,
    pub invalidated: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
    invalidated: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Invalidation stamp of one table, taken with [`CacheStore::generation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    table: u64,
}

struct Slots<V> {
    entries: LruCache<String, CacheEntry<V>>,
    /// Bumped by every table-scoped invalidation.
    tables: HashMap<String, u64>,
    /// Bumped by every full flush.
    epoch: u64,
}

impl<V> Slots<V> {
    fn generation(&self, table: &str) -> Generation {
        Generation {
            epoch: self.epoch,
            table: self.tables.get(table).copied().unwrap_or(0),
        }
    }

    fn bump(&mut self, table: &str) {
        *self.tables.entry(table.to_string()).or_insert(0) += 1;
    }
}

/// Process-wide read cache.
pub struct CacheStore<V = QueryResponse> {
    slots: Mutex<Slots<V>>,
    counters: Counters,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: LruCache::new(capacity),
                tables: HashMap::new(),
                epoch: 0,
            }),
            counters: Counters::default(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.max_entries_non_zero())
    }

    /// Store `value` under `key`, replacing any existing entry.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut slots = mutex_lock(&self.slots, SOURCE, "put");
        self.insert(&mut slots, key.into(), value, ttl);
    }

    /// Current invalidation stamp of `table`.
    pub fn generation(&self, table: &str) -> Generation {
        mutex_lock(&self.slots, SOURCE, "generation").generation(table)
    }

    /// Store `value` only if `table` has not been invalidated or flushed since
    /// `seen` was taken. Returns whether the entry was stored.
    pub fn put_if_current(
        &self,
        table: &str,
        seen: Generation,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
    ) -> bool {
        let key = key.into();
        let mut slots = mutex_lock(&self.slots, SOURCE, "put_if_current");
        if slots.generation(table) != seen {
            debug!(key = %key, "discarding read result fetched before invalidation");
            return false;
        }
        self.insert(&mut slots, key, value, ttl);
        true
    }

    fn insert(&self, slots: &mut Slots<V>, key: String, value: V, ttl: Duration) {
        let entry = CacheEntry {
            key: key.clone(),
            value,
            stored_at: Instant::now(),
            ttl,
        };

        if let Some((evicted_key, _)) = slots.entries.push(key.clone(), entry)
            && evicted_key != key
        {
            Counters::bump(&self.counters.evicted, 1);
            debug!(key = %evicted_key, "cache entry evicted at capacity");
        }
        gauge!(METRIC_CACHE_ENTRIES).set(slots.entries.len() as f64);
    }

    /// Fetch a fresh value, purging the entry if its TTL has elapsed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut slots = mutex_lock(&self.slots, SOURCE, "get");
        let entries = &mut slots.entries;

        let lookup = entries
            .get(key)
            .map(|entry| entry.is_fresh(now).then(|| entry.value.clone()));

        match lookup {
            Some(Some(value)) => {
                Counters::bump(&self.counters.hits, 1);
                Some(value)
            }
            Some(None) => {
                entries.pop(key);
                gauge!(METRIC_CACHE_ENTRIES).set(entries.len() as f64);
                Counters::bump(&self.counters.expired, 1);
                Counters::bump(&self.counters.misses, 1);
                trace!(key, "cache entry expired");
                None
            }
            None => {
                Counters::bump(&self.counters.misses, 1);
                None
            }
        }
    }

    /// Remove every entry whose key starts with `prefix:`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let removed = self.remove_prefixed(prefix, "invalidate_by_prefix");
        Counters::bump(&self.counters.invalidated, removed as u64);
        removed
    }

    /// Flush everything, or only the entries belonging to `table`.
    pub fn clear(&self, table: Option<&str>) -> usize {
        match table {
            Some(table) => self.remove_prefixed(table, "clear.table"),
            None => {
                let mut slots = mutex_lock(&self.slots, SOURCE, "clear");
                let removed = slots.entries.len();
                slots.entries.clear();
                slots.epoch += 1;
                gauge!(METRIC_CACHE_ENTRIES).set(0.0);
                removed
            }
        }
    }

    fn remove_prefixed(&self, table: &str, op: &'static str) -> usize {
        let needle = table_prefix(table);
        let mut slots = mutex_lock(&self.slots, SOURCE, op);
        slots.bump(table);

        let doomed: Vec<String> = slots
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(&needle))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            slots.entries.pop(key);
        }

        gauge!(METRIC_CACHE_ENTRIES).set(slots.entries.len() as f64);
        doomed.len()
    }

    /// Whether a fresh entry exists, without touching recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        mutex_lock(&self.slots, SOURCE, "contains")
            .entries
            .peek(key)
            .is_some_and(|entry| entry.is_fresh(now))
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.slots, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let slots = mutex_lock(&self.slots, SOURCE, "stats");
        let entries = &slots.entries;
        let mut keys: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();
        keys.sort();

        CacheStats {
            entries: entries.len(),
            keys,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            invalidated: self.counters.invalidated.load(Ordering::Relaxed),
        }
    }
}
