//! In-process backend.
//!
//! Tables are vectors of JSON objects; auth keeps accounts and a single
//! current session; storage keeps objects per bucket. Latency and failures can
//! be injected to exercise the middleware's timing and error paths.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::trace;
use uuid::Uuid;

use crate::cache::mutex_lock;

use super::auth::{
    AuthBackend, AuthChangeEvent, AuthResponse, AuthStateListener, AuthSubscription, Credentials,
    Session, SignUpRequest, User,
};
use super::{
    Filter, FilterOp, Mutation, MutationKind, QueryBackend, QueryResponse, SelectQuery,
    StorageBackend, UploadOptions, UploadReceipt, UpstreamError,
};

const SOURCE: &str = "upstream::memory";
const DEFAULT_CONFLICT_COLUMN: &str = "id";
const SESSION_LIFETIME: time::Duration = time::Duration::hours(1);

/// Which backend call an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Select,
    Mutate,
    Auth,
    Upload,
    Any,
}

impl Target {
    fn matches(self, call: Target) -> bool {
        self == Target::Any || self == call
    }
}

type SharedListener = Arc<dyn Fn(AuthChangeEvent, Option<&Session>) + Send + Sync>;
type ListenerList = Mutex<Vec<(Uuid, SharedListener)>>;

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct AuthState {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
}

#[derive(Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

#[derive(Default)]
struct CallCounts {
    select: AtomicUsize,
    mutate: AtomicUsize,
    auth: AtomicUsize,
    upload: AtomicUsize,
}

/// Reference implementation of every backend trait.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    buckets: Mutex<HashMap<String, HashMap<String, StoredObject>>>,
    auth: Mutex<AuthState>,
    listeners: Arc<ListenerList>,
    faults: Mutex<VecDeque<(Target, UpstreamError)>>,
    latency: Mutex<Duration>,
    calls: CallCounts,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` (if needed) and append `rows`.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        mutex_lock(&self.tables, SOURCE, "seed")
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        mutex_lock(&self.tables, SOURCE, "rows")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn create_bucket(&self, bucket: &str) {
        mutex_lock(&self.buckets, SOURCE, "create_bucket")
            .entry(bucket.to_string())
            .or_default();
    }

    /// Stored object body and content type.
    pub fn object(&self, bucket: &str, path: &str) -> Option<(Bytes, String)> {
        mutex_lock(&self.buckets, SOURCE, "object")
            .get(bucket)
            .and_then(|objects| objects.get(path))
            .map(|object| (object.body.clone(), object.content_type.clone()))
    }

    /// Make the next call matching `target` fail with `error`.
    pub fn fail_next(&self, target: Target, error: UpstreamError) {
        mutex_lock(&self.faults, SOURCE, "fail_next").push_back((target, error));
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *mutex_lock(&self.latency, SOURCE, "set_latency") = latency;
    }

    pub fn select_calls(&self) -> usize {
        self.calls.select.load(AtomicOrdering::SeqCst)
    }

    pub fn mutation_calls(&self) -> usize {
        self.calls.mutate.load(AtomicOrdering::SeqCst)
    }

    pub fn auth_calls(&self) -> usize {
        self.calls.auth.load(AtomicOrdering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.calls.upload.load(AtomicOrdering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        mutex_lock(&*self.listeners, SOURCE, "listener_count").len()
    }

    async fn enter(&self, call: Target) -> Result<(), UpstreamError> {
        let counter = match call {
            Target::Select => &self.calls.select,
            Target::Mutate => &self.calls.mutate,
            Target::Auth => &self.calls.auth,
            Target::Upload | Target::Any => &self.calls.upload,
        };
        counter.fetch_add(1, AtomicOrdering::SeqCst);

        let latency = *mutex_lock(&self.latency, SOURCE, "enter.latency");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut faults = mutex_lock(&self.faults, SOURCE, "enter.faults");
        match faults.iter().position(|(target, _)| target.matches(call)) {
            Some(index) => match faults.remove(index) {
                Some((_, error)) => Err(error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn notify(&self, event: AuthChangeEvent, session: Option<&Session>) {
        let listeners: Vec<SharedListener> = mutex_lock(&*self.listeners, SOURCE, "notify")
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        trace!(?event, listeners = listeners.len(), "auth state change");
        for listener in listeners {
            listener(event, session);
        }
    }
}

#[async_trait]
impl QueryBackend for MemoryBackend {
    type QueryError = UpstreamError;

    async fn select(&self, query: &SelectQuery) -> Result<QueryResponse, UpstreamError> {
        self.enter(Target::Select).await?;

        let tables = mutex_lock(&self.tables, SOURCE, "select");
        let rows = tables
            .get(&query.table)
            .ok_or_else(|| undefined_table(&query.table))?;

        let mut matched: Vec<&Value> = rows
            .iter()
            .filter(|row| matches_all(row, &query.filters))
            .collect();
        for order in query.order.iter().rev() {
            matched.sort_by(|a, b| {
                let ordering = compare(field(a, &order.column), field(b, &order.column))
                    .unwrap_or(Ordering::Equal);
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        let projected: Vec<Value> = matched
            .into_iter()
            .map(|row| project(row, &query.columns))
            .collect();

        if query.single {
            let found = projected.len();
            let mut projected = projected.into_iter();
            return match (projected.next(), projected.next()) {
                (Some(row), None) => Ok(QueryResponse::new(row).with_count(1)),
                _ => Err(UpstreamError::with_code(
                    "PGRST116",
                    "JSON object requested, multiple (or no) rows returned",
                )
                .details(format!("The result contains {found} rows"))),
            };
        }

        let count = projected.len() as u64;
        Ok(QueryResponse::new(Value::Array(projected)).with_count(count))
    }

    async fn mutate(&self, mutation: &Mutation) -> Result<QueryResponse, UpstreamError> {
        self.enter(Target::Mutate).await?;

        let mut tables = mutex_lock(&self.tables, SOURCE, "mutate");
        let rows = tables
            .get_mut(&mutation.table)
            .ok_or_else(|| undefined_table(&mutation.table))?;

        let (affected, status) = match mutation.kind {
            MutationKind::Insert => (insert(rows, &mutation.table, mutation)?, 201),
            MutationKind::Update => (update(rows, mutation)?, 200),
            MutationKind::Delete => {
                let (removed, kept): (Vec<Value>, Vec<Value>) = std::mem::take(rows)
                    .into_iter()
                    .partition(|row| matches_all(row, &mutation.filters));
                *rows = kept;
                (removed, 200)
            }
            MutationKind::Upsert => (upsert(rows, mutation)?, 201),
        };

        let count = affected.len() as u64;
        let response = match &mutation.returning {
            Some(columns) => QueryResponse::new(Value::Array(
                affected.iter().map(|row| project(row, columns)).collect(),
            ))
            .with_status(status),
            None => QueryResponse::new(Value::Null).with_status(204),
        };
        Ok(response.with_count(count))
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    type AuthError = UpstreamError;

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthResponse, UpstreamError> {
        self.enter(Target::Auth).await?;

        let session = {
            let mut state = mutex_lock(&self.auth, SOURCE, "sign_in");
            let account = state
                .accounts
                .get(&credentials.email)
                .filter(|account| account.password == credentials.password)
                .ok_or_else(|| {
                    UpstreamError::with_code("invalid_credentials", "Invalid login credentials")
                })?;
            let session = issue_session(account.user.clone());
            state.session = Some(session.clone());
            session
        };

        self.notify(AuthChangeEvent::SignedIn, Some(&session));
        Ok(AuthResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        })
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<AuthResponse, UpstreamError> {
        self.enter(Target::Auth).await?;

        let email = request.credentials.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(UpstreamError::with_code(
                "validation_failed",
                "Unable to validate email address: invalid format",
            ));
        }

        let session = {
            let mut state = mutex_lock(&self.auth, SOURCE, "sign_up");
            if state.accounts.contains_key(&email) {
                return Err(UpstreamError::with_code(
                    "user_already_exists",
                    "User already registered",
                ));
            }

            let user = User {
                id: Uuid::new_v4(),
                email: email.clone(),
                metadata: request.data.clone().unwrap_or(Value::Object(Map::new())),
                created_at: OffsetDateTime::now_utc(),
            };
            state.accounts.insert(
                email,
                Account {
                    user: user.clone(),
                    password: request.credentials.password.clone(),
                },
            );
            let session = issue_session(user);
            state.session = Some(session.clone());
            session
        };

        self.notify(AuthChangeEvent::SignedIn, Some(&session));
        Ok(AuthResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        })
    }

    async fn sign_out(&self) -> Result<(), UpstreamError> {
        self.enter(Target::Auth).await?;
        mutex_lock(&self.auth, SOURCE, "sign_out").session = None;
        self.notify(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, UpstreamError> {
        self.enter(Target::Auth).await?;
        Ok(mutex_lock(&self.auth, SOURCE, "get_session").session.clone())
    }

    async fn get_user(&self, access_token: Option<&str>) -> Result<Option<User>, UpstreamError> {
        self.enter(Target::Auth).await?;
        let state = mutex_lock(&self.auth, SOURCE, "get_user");
        match (access_token, state.session.as_ref()) {
            (None, session) => Ok(session.map(|session| session.user.clone())),
            (Some(token), Some(session)) if session.access_token == token => {
                Ok(Some(session.user.clone()))
            }
            (Some(_), _) => Err(UpstreamError::with_code(
                "bad_jwt",
                "invalid JWT: unable to parse or verify signature",
            )),
        }
    }

    async fn refresh_session(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<AuthResponse, UpstreamError> {
        self.enter(Target::Auth).await?;

        let session = {
            let mut state = mutex_lock(&self.auth, SOURCE, "refresh_session");
            let current = state
                .session
                .as_ref()
                .filter(|session| {
                    refresh_token.is_none_or(|token| session.refresh_token == token)
                })
                .ok_or_else(|| {
                    UpstreamError::with_code(
                        "refresh_token_not_found",
                        "Invalid Refresh Token: Refresh Token Not Found",
                    )
                })?;
            let session = issue_session(current.user.clone());
            state.session = Some(session.clone());
            session
        };

        self.notify(AuthChangeEvent::TokenRefreshed, Some(&session));
        Ok(AuthResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        })
    }

    fn on_auth_state_change(&self, listener: AuthStateListener) -> AuthSubscription {
        let id = Uuid::new_v4();
        let listener: SharedListener = Arc::from(listener);
        mutex_lock(&*self.listeners, SOURCE, "subscribe").push((id, Arc::clone(&listener)));

        let current = mutex_lock(&self.auth, SOURCE, "subscribe.session")
            .session
            .clone();
        listener(AuthChangeEvent::InitialSession, current.as_ref());

        let listeners = Arc::downgrade(&self.listeners);
        AuthSubscription::new(id, move || {
            if let Some(listeners) = listeners.upgrade() {
                mutex_lock(&*listeners, SOURCE, "unsubscribe")
                    .retain(|(registered, _)| *registered != id);
            }
        })
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    type StorageError = UpstreamError;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> Result<UploadReceipt, UpstreamError> {
        self.enter(Target::Upload).await?;

        let mut buckets = mutex_lock(&self.buckets, SOURCE, "upload");
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| UpstreamError::with_code("bucket_not_found", "Bucket not found"))?;
        if objects.contains_key(path) && !options.upsert {
            return Err(UpstreamError::with_code(
                "resource_already_exists",
                "The resource already exists",
            ));
        }

        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let size = body.len();
        objects.insert(
            path.to_string(),
            StoredObject {
                body,
                content_type: content_type.clone(),
            },
        );

        Ok(UploadReceipt {
            bucket: bucket.to_string(),
            path: path.to_string(),
            full_path: format!("{bucket}/{path}"),
            size,
            content_type,
        })
    }
}

fn issue_session(user: User) -> Session {
    Session {
        access_token: format!("at-{}", Uuid::new_v4()),
        refresh_token: format!("rt-{}", Uuid::new_v4()),
        expires_at: OffsetDateTime::now_utc() + SESSION_LIFETIME,
        user,
    }
}

fn undefined_table(table: &str) -> UpstreamError {
    UpstreamError::with_code("42P01", format!("relation \"public.{table}\" does not exist"))
}

fn invalid_payload(reason: &str) -> UpstreamError {
    UpstreamError::with_code("PGRST102", format!("Invalid body: {reason}"))
}

fn field<'a>(row: &'a Value, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    compare(left, right).map_or(left == right, |ordering| ordering == Ordering::Equal)
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let actual = field(row, &filter.column);
    match filter.op {
        FilterOp::Eq => equals(actual, &filter.value),
        FilterOp::Neq => !equals(actual, &filter.value),
        FilterOp::Gt => compare(actual, &filter.value) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(
            compare(actual, &filter.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::Lt => compare(actual, &filter.value) == Some(Ordering::Less),
        FilterOp::Lte => matches!(
            compare(actual, &filter.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::In => filter
            .value
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|value| equals(actual, value))),
    }
}

fn matches_all(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches(row, filter))
}

fn project(row: &Value, columns: &str) -> Value {
    let columns = columns.trim();
    if columns.is_empty() || columns == "*" {
        return row.clone();
    }

    let projected: Map<String, Value> = columns
        .split(',')
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .map(|column| (column.to_string(), field(row, column).clone()))
        .collect();
    Value::Object(projected)
}

fn payload_rows(mutation: &Mutation) -> Result<Vec<Value>, UpstreamError> {
    match &mutation.payload {
        Some(Value::Array(rows)) if rows.iter().all(Value::is_object) => Ok(rows.clone()),
        Some(row @ Value::Object(_)) => Ok(vec![row.clone()]),
        Some(_) => Err(invalid_payload("expected an object or an array of objects")),
        None => Err(invalid_payload("missing rows")),
    }
}

fn merge(target: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(fields) = target {
        for (column, value) in patch {
            fields.insert(column.clone(), value.clone());
        }
    }
}

fn insert(
    rows: &mut Vec<Value>,
    table: &str,
    mutation: &Mutation,
) -> Result<Vec<Value>, UpstreamError> {
    let incoming = payload_rows(mutation)?;
    for row in &incoming {
        let id = field(row, DEFAULT_CONFLICT_COLUMN);
        if !id.is_null()
            && rows
                .iter()
                .any(|existing| equals(field(existing, DEFAULT_CONFLICT_COLUMN), id))
        {
            return Err(UpstreamError::with_code(
                "23505",
                format!("duplicate key value violates unique constraint \"{table}_pkey\""),
            )
            .details(format!("Key ({DEFAULT_CONFLICT_COLUMN})=({id}) already exists.")));
        }
    }
    rows.extend(incoming.iter().cloned());
    Ok(incoming)
}

fn update(rows: &mut [Value], mutation: &Mutation) -> Result<Vec<Value>, UpstreamError> {
    let Some(Value::Object(patch)) = &mutation.payload else {
        return Err(invalid_payload("update expects an object"));
    };

    let mut affected = Vec::new();
    for row in rows
        .iter_mut()
        .filter(|row| matches_all(row, &mutation.filters))
    {
        merge(row, patch);
        affected.push(row.clone());
    }
    Ok(affected)
}

fn upsert(rows: &mut Vec<Value>, mutation: &Mutation) -> Result<Vec<Value>, UpstreamError> {
    let conflict = mutation
        .on_conflict
        .as_deref()
        .unwrap_or(DEFAULT_CONFLICT_COLUMN);

    let mut affected = Vec::new();
    for incoming in payload_rows(mutation)? {
        let key = field(&incoming, conflict);
        let position = if key.is_null() {
            None
        } else {
            rows.iter().position(|row| equals(field(row, conflict), key))
        };

        match position {
            Some(index) => {
                if let Some(patch) = incoming.as_object() {
                    merge(&mut rows[index], patch);
                }
                affected.push(rows[index].clone());
            }
            None => {
                rows.push(incoming.clone());
                affected.push(incoming);
            }
        }
    }
    Ok(affected)
}
