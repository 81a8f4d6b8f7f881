//! Process-wide call metrics.

use metrics::{counter, histogram};
use serde::Serialize;

pub const METRIC_QUERY_TIME_MS: &str = "veneer_query_time_ms";
pub const METRIC_MUTATION_TIME_MS: &str = "veneer_mutation_time_ms";
pub const METRIC_AUTH_TIME_MS: &str = "veneer_auth_time_ms";
pub const METRIC_STORAGE_TIME_MS: &str = "veneer_storage_time_ms";
pub const METRIC_CACHE_HIT: &str = "veneer_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "veneer_cache_miss_total";
pub const METRIC_QUERY_ERROR: &str = "veneer_query_error_total";
pub const METRIC_MUTATION_ERROR: &str = "veneer_mutation_error_total";
pub const METRIC_AUTH_ERROR: &str = "veneer_auth_error_total";
pub const METRIC_STORAGE_ERROR: &str = "veneer_storage_error_total";
pub const METRIC_SLOW_CALL: &str = "veneer_slow_call_total";
pub const METRIC_CALL_CANCELLED: &str = "veneer_call_cancelled_total";
pub const METRIC_SINK_FAILURE: &str = "veneer_sink_failure_total";
pub const METRIC_CACHE_INVALIDATION: &str = "veneer_cache_invalidation_total";
pub const METRIC_CACHE_ENTRIES: &str = "veneer_cache_entries";

/// What kind of wrapped call produced a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Query,
    Mutation,
    Auth,
    Storage,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Auth => "auth",
            Self::Storage => "storage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Read served from cache; the backend was not called.
    Hit,
    /// Read executed against the backend.
    Miss,
    /// Uncached call succeeded.
    Ok,
    Error,
    Cancelled,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One measured call, handed to the sink and folded into the process-wide
/// counters. Not retained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallMetric {
    /// `cacheHit`, `cacheMiss`, `queryTime`, `queryError`, `mutationTime`, ...
    pub name: &'static str,
    pub kind: CallKind,
    pub table: String,
    pub operation: String,
    pub duration_ms: f64,
    pub outcome: CallOutcome,
}

impl CallMetric {
    pub fn new(
        kind: CallKind,
        table: impl Into<String>,
        operation: impl Into<String>,
        duration_ms: f64,
        outcome: CallOutcome,
    ) -> Self {
        Self {
            name: metric_name(kind, outcome),
            kind,
            table: table.into(),
            operation: operation.into(),
            duration_ms,
            outcome,
        }
    }
}

fn metric_name(kind: CallKind, outcome: CallOutcome) -> &'static str {
    match (kind, outcome) {
        (_, CallOutcome::Cancelled) => "callCancelled",
        (CallKind::Query, CallOutcome::Hit) => "cacheHit",
        (CallKind::Query, CallOutcome::Miss) => "cacheMiss",
        (CallKind::Query, CallOutcome::Error) => "queryError",
        (CallKind::Query, _) => "queryTime",
        (CallKind::Mutation, CallOutcome::Error) => "mutationError",
        (CallKind::Mutation, _) => "mutationTime",
        (CallKind::Auth, CallOutcome::Error) => "authError",
        (CallKind::Auth, _) => "authTime",
        (CallKind::Storage, CallOutcome::Error) => "storageError",
        (CallKind::Storage, _) => "storageTime",
    }
}

fn time_histogram(kind: CallKind) -> &'static str {
    match kind {
        CallKind::Query => METRIC_QUERY_TIME_MS,
        CallKind::Mutation => METRIC_MUTATION_TIME_MS,
        CallKind::Auth => METRIC_AUTH_TIME_MS,
        CallKind::Storage => METRIC_STORAGE_TIME_MS,
    }
}

fn error_counter(kind: CallKind) -> &'static str {
    match kind {
        CallKind::Query => METRIC_QUERY_ERROR,
        CallKind::Mutation => METRIC_MUTATION_ERROR,
        CallKind::Auth => METRIC_AUTH_ERROR,
        CallKind::Storage => METRIC_STORAGE_ERROR,
    }
}

/// Fold `metric` into the global recorder.
pub(crate) fn record(metric: &CallMetric, error_category: Option<&'static str>) {
    let table = metric.table.clone();
    let operation = metric.operation.clone();

    match metric.outcome {
        CallOutcome::Hit => {
            counter!(METRIC_CACHE_HIT, "table" => table).increment(1);
            return;
        }
        CallOutcome::Cancelled => {
            counter!(
                METRIC_CALL_CANCELLED,
                "kind" => metric.kind.as_str(),
                "table" => table,
                "operation" => operation
            )
            .increment(1);
            return;
        }
        CallOutcome::Miss => {
            counter!(METRIC_CACHE_MISS, "table" => table.clone()).increment(1);
        }
        CallOutcome::Error => {
            counter!(
                error_counter(metric.kind),
                "table" => table.clone(),
                "operation" => operation.clone(),
                "category" => error_category.unwrap_or("unknown")
            )
            .increment(1);
        }
        CallOutcome::Ok => {}
    }

    histogram!(
        time_histogram(metric.kind),
        "table" => table,
        "operation" => operation,
        "outcome" => metric.outcome.as_str()
    )
    .record(metric.duration_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_kind_and_outcome() {
        let cases = [
            (CallKind::Query, CallOutcome::Hit, "cacheHit"),
            (CallKind::Query, CallOutcome::Miss, "cacheMiss"),
            (CallKind::Query, CallOutcome::Error, "queryError"),
            (CallKind::Query, CallOutcome::Ok, "queryTime"),
            (CallKind::Mutation, CallOutcome::Ok, "mutationTime"),
            (CallKind::Mutation, CallOutcome::Error, "mutationError"),
            (CallKind::Auth, CallOutcome::Ok, "authTime"),
            (CallKind::Storage, CallOutcome::Error, "storageError"),
            (CallKind::Mutation, CallOutcome::Cancelled, "callCancelled"),
        ];

        for (kind, outcome, expected) in cases {
            let metric = CallMetric::new(kind, "profiles", "select", 1.0, outcome);
            assert_eq!(metric.name, expected, "{kind:?}/{outcome:?}");
        }
    }
}
