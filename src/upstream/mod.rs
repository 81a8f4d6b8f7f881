//! Interfaces of the wrapped collaborators.
//!
//! The relational store, its auth service and its object storage are external
//! to this crate. The traits here describe the calls the middleware makes;
//! [`memory::MemoryBackend`] is an in-process implementation of all three.

pub mod auth;
mod error;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use auth::{
    AuthBackend, AuthChangeEvent, AuthResponse, AuthStateListener, AuthSubscription, Credentials,
    Session, SignUpRequest, User,
};
pub use error::{ABORTED_CODE, ErrorCategory, UpstreamError, UpstreamFailure};

/// Resolved result of a query or mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: Value,
    pub count: Option<u64>,
    pub status: u16,
}

impl QueryResponse {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            count: None,
            status: 200,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
        }
    }
}

/// A single `column op value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// A fully built read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
    /// Expect exactly one row and return it as an object.
    pub single: bool,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>, columns: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            single: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    Upsert,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upsert => "upsert",
        }
    }
}

/// A fully built write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub table: String,
    pub kind: MutationKind,
    /// Rows for insert/upsert, patch object for update, absent for delete.
    pub payload: Option<Value>,
    pub filters: Vec<Filter>,
    /// Columns to return for the affected rows.
    pub returning: Option<String>,
    /// Conflict target for upserts.
    pub on_conflict: Option<String>,
}

impl Mutation {
    pub fn new(table: impl Into<String>, kind: MutationKind, payload: Option<Value>) -> Self {
        Self {
            table: table.into(),
            kind,
            payload,
            filters: Vec::new(),
            returning: None,
            on_conflict: None,
        }
    }
}

/// Table reads and writes.
#[async_trait]
pub trait QueryBackend: Send + Sync + 'static {
    type QueryError: UpstreamFailure;

    async fn select(&self, query: &SelectQuery) -> Result<QueryResponse, Self::QueryError>;

    async fn mutate(&self, mutation: &Mutation) -> Result<QueryResponse, Self::QueryError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// `Cache-Control` max-age in seconds, as a string.
    pub cache_control: Option<String>,
    /// Overwrite an existing object at the same path.
    pub upsert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub bucket: String,
    pub path: String,
    pub full_path: String,
    pub size: usize,
    pub content_type: String,
}

/// Object storage.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    type StorageError: UpstreamFailure;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> Result<UploadReceipt, Self::StorageError>;
}
