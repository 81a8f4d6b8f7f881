//! Client facade.
//!
//! [`Client`] is built once at startup from a backend and a fixed
//! [`ClientConfig`] and handed to whatever needs data access. Clones share the
//! same cache and instrumentation.
//!
//! ```no_run
//! # async fn demo() -> Result<(), veneer::upstream::UpstreamError> {
//! use std::sync::Arc;
//! use serde_json::json;
//! use veneer::cache::ClientConfig;
//! use veneer::client::Client;
//! use veneer::upstream::memory::MemoryBackend;
//!
//! let client = Client::new(Arc::new(MemoryBackend::default()), ClientConfig::default());
//! let rows = client.from("profiles").select("*").eq("active", true).await?;
//! client.from("profiles").update(json!({ "name": "x" })).eq("id", 1).await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

/// Filter methods shared by read and write builders. `$field` names the
/// builder field holding the `filters` list.
macro_rules! filter_methods {
    ($field:ident) => {
        /// Keep rows where `column == value`.
        pub fn eq(self, column: &str, value: impl Into<::serde_json::Value>) -> Self {
            self.filter(column, $crate::upstream::FilterOp::Eq, value.into())
        }

        /// Keep rows where `column != value`.
        pub fn neq(self, column: &str, value: impl Into<::serde_json::Value>) -> Self {
            self.filter(column, $crate::upstream::FilterOp::Neq, value.into())
        }

        pub fn gt(self, column: &str, value: impl Into<::serde_json::Value>) -> Self {
            self.filter(column, $crate::upstream::FilterOp::Gt, value.into())
        }

        pub fn gte(self, column: &str, value: impl Into<::serde_json::Value>) -> Self {
            self.filter(column, $crate::upstream::FilterOp::Gte, value.into())
        }

        pub fn lt(self, column: &str, value: impl Into<::serde_json::Value>) -> Self {
            self.filter(column, $crate::upstream::FilterOp::Lt, value.into())
        }

        pub fn lte(self, column: &str, value: impl Into<::serde_json::Value>) -> Self {
            self.filter(column, $crate::upstream::FilterOp::Lte, value.into())
        }

        /// Keep rows whose `column` is one of `values`.
        pub fn in_<I, T>(self, column: &str, values: I) -> Self
        where
            I: IntoIterator<Item = T>,
            T: Into<::serde_json::Value>,
        {
            let values = values.into_iter().map(Into::into).collect();
            self.filter(
                column,
                $crate::upstream::FilterOp::In,
                ::serde_json::Value::Array(values),
            )
        }

        fn filter(
            mut self,
            column: &str,
            op: $crate::upstream::FilterOp,
            value: ::serde_json::Value,
        ) -> Self {
            self.$field.filters.push($crate::upstream::Filter {
                column: column.to_string(),
                op,
                value,
            });
            self
        }
    };
}

mod auth;
mod mutation;
mod query;
mod storage;

use std::future::Future;
use std::sync::Arc;

use crate::cache::{CacheStats, CacheStore, ClientConfig};
use crate::instrument::{
    CallContext, CallOutcome, Instrumentation, ObservabilitySink, TracingSink,
};
use crate::upstream::{AuthBackend, QueryBackend, StorageBackend, UpstreamFailure};

pub use auth::AuthClient;
pub use mutation::MutationBuilder;
pub use query::{SelectBuilder, SharedQuery, TableQuery};
pub use storage::{BucketClient, StorageClient};

use tracing::Instrument;

pub(crate) struct ClientInner<B> {
    pub(crate) backend: Arc<B>,
    pub(crate) store: CacheStore,
    pub(crate) instrumentation: Instrumentation,
    pub(crate) config: ClientConfig,
}

/// Caching, instrumented client over a backend `B`.
pub struct Client<B> {
    inner: Arc<ClientInner<B>>,
}

impl<B> Clone for Client<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> std::fmt::Debug for Client<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("instrumentation", &self.inner.instrumentation)
            .finish_non_exhaustive()
    }
}

impl<B> Client<B> {
    /// Client reporting to [`TracingSink`].
    pub fn new(backend: Arc<B>, config: ClientConfig) -> Self {
        Self::with_sink(backend, config, Arc::new(TracingSink))
    }

    pub fn with_sink(
        backend: Arc<B>,
        config: ClientConfig,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        let store = CacheStore::from_config(&config);
        let instrumentation = Instrumentation::new(&config, sink);
        Self {
            inner: Arc::new(ClientInner {
                backend,
                store,
                instrumentation,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.inner.backend
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.inner.instrumentation
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    /// Flush the whole cache, or only `table`'s entries. Returns the number
    /// of entries removed.
    pub fn clear_cache(&self, table: Option<&str>) -> usize {
        let removed = self.inner.store.clear(table);
        tracing::info!(table = table.unwrap_or("*"), removed, "cache cleared");
        removed
    }
}

impl<B: QueryBackend> Client<B> {
    /// Start a read or write against `table`.
    pub fn from(&self, table: &str) -> TableQuery<B> {
        TableQuery::new(Arc::clone(&self.inner), table)
    }
}

impl<B: AuthBackend> Client<B> {
    pub fn auth(&self) -> AuthClient<B> {
        AuthClient::new(Arc::clone(&self.inner))
    }
}

impl<B: StorageBackend> Client<B> {
    pub fn storage(&self) -> StorageClient<B> {
        StorageClient::new(Arc::clone(&self.inner))
    }
}

/// Run an uncached call under `context`, returning exactly what it returned.
pub(crate) async fn track<T, E, F>(
    instrumentation: &Instrumentation,
    context: CallContext,
    call: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: UpstreamFailure,
{
    let span = context.tracing_span();
    async move {
        let guard = instrumentation.begin(context);
        match call.await {
            Ok(value) => {
                guard.succeed(CallOutcome::Ok);
                Ok(value)
            }
            Err(error) => {
                guard.fail(&error);
                Err(error)
            }
        }
    }
    .instrument(span)
    .await
}
