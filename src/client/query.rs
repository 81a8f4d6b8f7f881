use std::future::IntoFuture;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tracing::{Instrument, trace};

use crate::cache::CacheKey;
use crate::instrument::{CallContext, CallOutcome};
use crate::upstream::{
    Mutation, MutationKind, OrderBy, QueryBackend, QueryResponse, SelectQuery,
};

use super::ClientInner;
use super::mutation::MutationBuilder;

/// Entry point returned by [`Client::from`](super::Client::from).
pub struct TableQuery<B> {
    client: Arc<ClientInner<B>>,
    table: String,
}

impl<B: QueryBackend> TableQuery<B> {
    pub(super) fn new(client: Arc<ClientInner<B>>, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Read `columns` (`"*"`, `"id, name"`, ...).
    pub fn select(self, columns: &str) -> SelectBuilder<B> {
        SelectBuilder {
            client: self.client,
            query: SelectQuery::new(self.table, columns),
        }
    }

    /// Insert one row (object) or many (array).
    pub fn insert(self, rows: Value) -> MutationBuilder<B> {
        self.mutation(MutationKind::Insert, Some(rows))
    }

    /// Patch every row matched by the builder's filters with `patch`.
    pub fn update(self, patch: Value) -> MutationBuilder<B> {
        self.mutation(MutationKind::Update, Some(patch))
    }

    pub fn delete(self) -> MutationBuilder<B> {
        self.mutation(MutationKind::Delete, None)
    }

    /// Insert rows, merging into existing rows that collide on the conflict
    /// column (`id` unless set with
    /// [`MutationBuilder::on_conflict`]).
    pub fn upsert(self, rows: Value) -> MutationBuilder<B> {
        self.mutation(MutationKind::Upsert, Some(rows))
    }

    fn mutation(self, kind: MutationKind, payload: Option<Value>) -> MutationBuilder<B> {
        MutationBuilder::new(self.client, Mutation::new(self.table, kind, payload))
    }
}

/// A read under construction. Awaiting it runs the query, serving from the
/// cache when a fresh entry exists under its key.
pub struct SelectBuilder<B> {
    client: Arc<ClientInner<B>>,
    query: SelectQuery,
}

impl<B: QueryBackend> SelectBuilder<B> {
    filter_methods!(query);

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.query.order.push(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Expect exactly one row; the response data is that row.
    pub fn single(mut self) -> Self {
        self.query.single = true;
        self
    }

    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// Key this read is cached under. Filters do not contribute to it, nor do
    /// the `single`, `order` or `limit` modifiers: `select("*").single()`
    /// shares a slot with `select("*")` and may be served its cached array.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::select(&self.query.table, &self.query.columns)
    }

    /// Turn the builder into a cloneable handle. Every clone awaits the same
    /// single execution.
    pub fn shared(self) -> SharedQuery<B>
    where
        B::QueryError: Clone,
    {
        SharedQuery {
            inner: self.into_future().shared(),
        }
    }

    async fn execute(self) -> Result<QueryResponse, B::QueryError> {
        let Self { client, query } = self;
        let key = CacheKey::select(&query.table, &query.columns);
        let context = CallContext::query(&query.table, &query.columns);
        let span = context.tracing_span();

        async move {
            let caching = client.config.enable_query_cache;

            if caching && let Some(cached) = client.store.get(key.as_str()) {
                client.instrumentation.cache_hit(&context);
                return Ok(cached);
            }

            let seen = client.store.generation(&query.table);
            let guard = client.instrumentation.begin(context);
            match client.backend.select(&query).await {
                Ok(response) => {
                    if !caching {
                        guard.succeed(CallOutcome::Ok);
                        return Ok(response);
                    }

                    trace!(key = %key, "caching read result");
                    client.store.put_if_current(
                        &query.table,
                        seen,
                        key,
                        response.clone(),
                        client.config.default_cache_ttl(),
                    );
                    guard.succeed(CallOutcome::Miss);
                    Ok(response)
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
}

impl<B: QueryBackend> IntoFuture for SelectBuilder<B> {
    type Output = Result<QueryResponse, B::QueryError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.execute().boxed()
    }
}

/// A read whose resolution is shared by every clone.
pub struct SharedQuery<B: QueryBackend> {
    inner: Shared<BoxFuture<'static, Result<QueryResponse, B::QueryError>>>,
}

impl<B: QueryBackend> Clone for SharedQuery<B>
where
    B::QueryError: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: QueryBackend> IntoFuture for SharedQuery<B>
where
    B::QueryError: Clone,
{
    type Output = Result<QueryResponse, B::QueryError>;
    type IntoFuture = Shared<BoxFuture<'static, Self::Output>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::future::IntoFuture;
    use std::sync::Arc;

    use serde_json::json;

    use crate::cache::ClientConfig;
    use crate::client::Client;
    use crate::upstream::memory::MemoryBackend;
    use crate::upstream::{FilterOp, UpstreamError};

    fn client() -> (Arc<MemoryBackend>, Client<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::default());
        backend.seed(
            "profiles",
            vec![
                json!({ "id": 1, "name": "ada", "age": 36 }),
                json!({ "id": 2, "name": "grace", "age": 45 }),
                json!({ "id": 3, "name": "linus", "age": 28 }),
            ],
        );
        let client = Client::new(backend.clone(), ClientConfig::default());
        (backend, client)
    }

    #[test]
    fn builder_collects_filters_order_and_limit() {
        let (_, client) = client();
        let builder = client
            .from("profiles")
            .select("id, name")
            .eq("id", 1)
            .gte("age", 30)
            .in_("name", ["ada", "grace"])
            .order("age", false)
            .limit(2);

        let query = builder.query();
        assert_eq!(query.table, "profiles");
        assert_eq!(query.columns, "id, name");
        assert_eq!(query.filters.len(), 3);
        assert_eq!(query.filters[1].op, FilterOp::Gte);
        assert_eq!(query.filters[2].value, json!(["ada", "grace"]));
        assert_eq!(query.limit, Some(2));
        assert!(!query.order[0].ascending);
        assert_eq!(builder.cache_key().as_str(), "profiles:select:id, name");
    }

    #[tokio::test]
    async fn filtered_reads_share_a_cache_slot() {
        let (backend, client) = client();

        let first = client.from("profiles").select("*").eq("id", 1).await.unwrap();
        let second = client.from("profiles").select("*").eq("id", 2).await.unwrap();

        assert_eq!(backend.select_calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn single_read_shares_a_slot_with_plain_read() {
        let (backend, client) = client();

        let plain = client.from("profiles").select("*").await.unwrap();
        let single = client.from("profiles").select("*").single().await.unwrap();

        assert_eq!(backend.select_calls(), 1);
        assert!(single.data.is_array());
        assert_eq!(plain, single);
    }

    #[tokio::test]
    async fn errors_are_returned_unchanged_and_not_cached() {
        let (backend, client) = client();
        backend.fail_next(
            crate::upstream::memory::Target::Select,
            UpstreamError::with_code("57014", "canceling statement due to statement timeout"),
        );

        let error = client.from("profiles").select("*").await.unwrap_err();
        assert_eq!(error.code.as_deref(), Some("57014"));
        assert_eq!(error.to_string(), "canceling statement due to statement timeout");

        client.from("profiles").select("*").await.unwrap();
        assert_eq!(backend.select_calls(), 2);
    }

    #[tokio::test]
    async fn disabled_cache_always_reaches_backend() {
        let backend = Arc::new(MemoryBackend::default());
        backend.seed("profiles", vec![json!({ "id": 1 })]);
        let client = Client::new(
            backend.clone(),
            ClientConfig {
                enable_query_cache: false,
                ..ClientConfig::default()
            },
        );

        client.from("profiles").select("*").await.unwrap();
        client.from("profiles").select("*").await.unwrap();

        assert_eq!(backend.select_calls(), 2);
        assert!(client.cache_stats().keys.is_empty());
    }

    #[tokio::test]
    async fn shared_query_executes_once() {
        let (backend, client) = client();
        let query = client.from("profiles").select("id").shared();

        let (a, b) = tokio::join!(query.clone().into_future(), query.clone().into_future());
        let c = query.await.unwrap();

        assert_eq!(a.unwrap(), c);
        assert_eq!(b.unwrap(), c);
        assert_eq!(backend.select_calls(), 1);
    }
}
