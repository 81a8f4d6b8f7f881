use std::future::IntoFuture;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use tracing::debug;

use crate::instrument::CallContext;
use crate::instrument::metrics::METRIC_CACHE_INVALIDATION;
use crate::upstream::{Mutation, QueryBackend, QueryResponse};

use super::{ClientInner, track};

/// An insert, update, delete or upsert under construction.
///
/// Awaiting it runs the write exactly once. If the write succeeds, every
/// cached read of the table is dropped before the result is returned; if it
/// fails, the cache is left alone.
pub struct MutationBuilder<B> {
    client: Arc<ClientInner<B>>,
    mutation: Mutation,
}

impl<B: QueryBackend> MutationBuilder<B> {
    pub(super) fn new(client: Arc<ClientInner<B>>, mutation: Mutation) -> Self {
        Self { client, mutation }
    }

    filter_methods!(mutation);

    /// Return the affected rows, projected to `columns`.
    pub fn select(mut self, columns: &str) -> Self {
        self.mutation.returning = Some(columns.to_string());
        self
    }

    /// Conflict column for upserts.
    pub fn on_conflict(mut self, column: &str) -> Self {
        self.mutation.on_conflict = Some(column.to_string());
        self
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    async fn execute(self) -> Result<QueryResponse, B::QueryError> {
        let Self { client, mutation } = self;
        let context = CallContext::mutation(
            &mutation.table,
            mutation.kind,
            mutation.returning.as_deref(),
        );

        let response = track(
            &client.instrumentation,
            context,
            client.backend.mutate(&mutation),
        )
        .await?;

        let removed = client.store.invalidate_by_prefix(&mutation.table);
        counter!(METRIC_CACHE_INVALIDATION, "table" => mutation.table.clone()).increment(1);
        debug!(
            table = %mutation.table,
            operation = mutation.kind.as_str(),
            removed,
            "cache invalidated after write"
        );

        Ok(response)
    }
}

impl<B: QueryBackend> IntoFuture for MutationBuilder<B> {
    type Output = Result<QueryResponse, B::QueryError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.execute().boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::cache::{CacheKey, ClientConfig};
    use crate::client::Client;
    use crate::upstream::memory::{MemoryBackend, Target};
    use crate::upstream::{MutationKind, UpstreamError};

    fn client() -> (Arc<MemoryBackend>, Client<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::default());
        backend.seed(
            "profiles",
            vec![json!({ "id": 1, "name": "ada" }), json!({ "id": 2, "name": "grace" })],
        );
        backend.seed("teams", vec![json!({ "id": 10, "name": "core" })]);
        let client = Client::new(backend.clone(), ClientConfig::default());
        (backend, client)
    }

    #[test]
    fn builder_records_kind_filters_and_returning() {
        let (_, client) = client();
        let builder = client
            .from("profiles")
            .update(json!({ "name": "x" }))
            .eq("id", 1)
            .select("id, name");

        let mutation = builder.mutation();
        assert_eq!(mutation.kind, MutationKind::Update);
        assert_eq!(mutation.filters.len(), 1);
        assert_eq!(mutation.returning.as_deref(), Some("id, name"));
    }

    #[tokio::test]
    async fn successful_write_invalidates_only_its_table() {
        let (backend, client) = client();
        client.from("profiles").select("*").await.unwrap();
        client.from("profiles").select("id").await.unwrap();
        client.from("teams").select("*").await.unwrap();

        client
            .from("profiles")
            .update(json!({ "name": "x" }))
            .eq("id", 1)
            .await
            .unwrap();

        let keys = client.cache_stats().keys;
        assert_eq!(keys, vec![CacheKey::select("teams", "*").to_string()]);

        let rows = client.from("profiles").select("*").eq("id", 1).await.unwrap();
        assert_eq!(rows.data[0]["name"], "x");
        assert_eq!(backend.select_calls(), 4);
        assert_eq!(backend.mutation_calls(), 1);
    }

    #[tokio::test]
    async fn failed_write_keeps_cache() {
        let (backend, client) = client();
        client.from("profiles").select("*").await.unwrap();
        backend.fail_next(Target::Mutate, UpstreamError::with_code("42501", "permission denied"));

        let error = client
            .from("profiles")
            .delete()
            .eq("id", 1)
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "permission denied");
        assert!(client.cache_stats().keys.contains(&"profiles:select:*".to_string()));
        assert_eq!(backend.rows("profiles").len(), 2);
    }

    #[tokio::test]
    async fn insert_and_upsert_return_projected_rows() {
        let (backend, client) = client();

        let inserted = client
            .from("profiles")
            .insert(json!({ "id": 3, "name": "linus" }))
            .select("id")
            .await
            .unwrap();
        assert_eq!(inserted.status, 201);
        assert_eq!(inserted.data, json!([{ "id": 3 }]));

        client
            .from("profiles")
            .upsert(json!([{ "id": 3, "name": "torvalds" }]))
            .await
            .unwrap();
        let names: Vec<_> = backend
            .rows("profiles")
            .into_iter()
            .map(|row| row["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("ada"), json!("grace"), json!("torvalds")]);
    }
}
