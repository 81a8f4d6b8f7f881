//! Read cache for the query middleware.
//!
//! Successful reads are stored under a `table:select:columns` key for a fixed
//! TTL. Any successful write to a table drops every entry with that table's
//! prefix.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `veneer.toml`:
//!
//! ```toml
//! [cache]
//! enable_query_cache = true
//! default_cache_ttl_ms = 300000
//! max_entries = 1000
//! # ... see config.rs for all options
//! ```

mod config;
mod keys;
mod lock;
mod store;

pub use config::ClientConfig;
pub use keys::{CacheKey, KEY_SEPARATOR, SELECT_OPERATION, table_prefix};
pub use store::{CacheEntry, CacheStats, CacheStore, Generation};

pub(crate) use lock::mutex_lock;
