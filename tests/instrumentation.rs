//! Timing, slow-call warnings, error pass-through, cancellation and sink
//! isolation for wrapped calls.

mod common;

use std::future::IntoFuture;
use std::time::Duration;

use serde_json::json;
use veneer::cache::ClientConfig;
use veneer::instrument::{CallKind, CallOutcome, SpanStatus};
use veneer::upstream::memory::Target;
use veneer::upstream::{ErrorCategory, QueryBackend, SelectQuery, UpstreamError};

use common::{RecordingSink, SinkMode, client_with, seeded_backend};

fn config(threshold_ms: u64) -> ClientConfig {
    ClientConfig {
        slow_query_threshold_ms: threshold_ms,
        ..ClientConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn slow_read_warns_once_and_returns_unchanged_result() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, config(1000), &sink);
    let direct = backend
        .select(&SelectQuery::new("profiles", "*"))
        .await
        .expect("direct read");

    backend.set_latency(Duration::from_millis(1500));
    let wrapped = client.from("profiles").select("*").await.expect("read");

    assert_eq!(wrapped, direct);
    let slow = sink.slow_calls();
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].table, "profiles");
    assert_eq!(slow[0].operation, "select");
    assert!(slow[0].duration >= Duration::from_millis(1500));
    assert_eq!(slow[0].threshold, Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn fast_read_and_cache_hit_do_not_warn() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, config(1000), &sink);

    backend.set_latency(Duration::from_millis(999));
    client.from("profiles").select("*").await.expect("read");
    client.from("profiles").select("*").await.expect("cached read");

    assert!(sink.slow_calls().is_empty());
    let metrics = sink.metrics();
    assert_eq!(metrics[0].outcome, CallOutcome::Miss);
    assert!((999.0..1000.0).contains(&metrics[0].duration_ms));
    assert_eq!(metrics[1].outcome, CallOutcome::Hit);
}

#[tokio::test(start_paused = true)]
async fn slow_write_warns() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, config(1000), &sink);

    backend.set_latency(Duration::from_millis(2500));
    client
        .from("teams")
        .insert(json!({ "id": 30, "name": "databases" }))
        .await
        .expect("insert");

    let slow = sink.slow_calls();
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].kind, CallKind::Mutation);
    assert_eq!(slow[0].operation, "insert");
}

#[tokio::test]
async fn read_error_passes_through_with_context() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, ClientConfig::default(), &sink);
    let boom = UpstreamError::new("boom");
    backend.fail_next(Target::Select, boom.clone());

    let error = client
        .from("profiles")
        .select("id, name")
        .eq("team", 10)
        .await
        .expect_err("read fails");

    assert_eq!(error.to_string(), "boom");
    assert_eq!(error, boom);
    assert_eq!(sink.metric_names(), vec!["queryError"]);

    let reports = sink.errors();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].table, "profiles");
    assert_eq!(reports[0].operation, "select");
    assert_eq!(reports[0].columns.as_deref(), Some("id, name"));
    assert_eq!(reports[0].category, ErrorCategory::Unknown);
    assert_eq!(reports[0].message, "boom");
    assert!(client.cache_stats().keys.is_empty());
}

#[tokio::test]
async fn write_error_passes_through_with_context() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, ClientConfig::default(), &sink);

    let error = client
        .from("profiles")
        .insert(json!({ "id": 1, "name": "Ada again" }))
        .await
        .expect_err("duplicate id");

    assert_eq!(error.code.as_deref(), Some("23505"));
    assert_eq!(sink.metric_names(), vec!["mutationError"]);
    let reports = sink.errors();
    assert_eq!(reports[0].category, ErrorCategory::Duplicate);
    assert_eq!(reports[0].operation, "insert");
    assert_eq!(sink.spans()[0].status, SpanStatus::Error);
}

#[tokio::test]
async fn unknown_table_is_classified() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, ClientConfig::default(), &sink);

    let error = client
        .from("attendance")
        .select("*")
        .await
        .expect_err("no such table");

    assert_eq!(error.code.as_deref(), Some("42P01"));
    assert_eq!(sink.errors()[0].category, ErrorCategory::UndefinedObject);
}

#[tokio::test(start_paused = true)]
async fn dropped_read_is_recorded_as_cancelled() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, ClientConfig::default(), &sink);
    backend.set_latency(Duration::from_secs(5));

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        client.from("profiles").select("*").into_future(),
    )
    .await;

    assert!(outcome.is_err());
    assert!(sink.errors().is_empty());
    assert!(sink.slow_calls().is_empty());
    assert_eq!(sink.metrics()[0].outcome, CallOutcome::Cancelled);
    assert_eq!(sink.spans()[0].status, SpanStatus::Cancelled);
    assert!(client.cache_stats().keys.is_empty());
}

#[tokio::test]
async fn aborted_call_is_cancelled_but_still_returned() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, ClientConfig::default(), &sink);
    backend.fail_next(Target::Mutate, UpstreamError::aborted());

    let error = client
        .from("profiles")
        .delete()
        .eq("id", 1)
        .await
        .expect_err("aborted");

    assert_eq!(error, UpstreamError::aborted());
    assert!(sink.errors().is_empty());
    assert_eq!(sink.metrics()[0].outcome, CallOutcome::Cancelled);
    assert_eq!(backend.rows("profiles").len(), 3);
}

#[tokio::test]
async fn shared_builder_resolves_once() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let client = client_with(&backend, ClientConfig::default(), &sink);

    let query = client.from("profiles").select("*").eq("id", 2).shared();
    let first = query.clone().await.expect("first resolution");
    let second = query.await.expect("second resolution");

    assert_eq!(first, second);
    assert_eq!(backend.select_calls(), 1);
    assert_eq!(sink.metric_names(), vec!["cacheMiss"]);
}

#[tokio::test]
async fn rejecting_sink_never_reaches_caller() {
    let backend = seeded_backend();
    let sink = RecordingSink::with_mode(SinkMode::Reject);
    let client = client_with(&backend, config(0), &sink);

    client.from("profiles").select("*").await.expect("read");
    client.from("profiles").select("*").await.expect("cached read");
    backend.fail_next(Target::Select, UpstreamError::new("boom"));
    client.clear_cache(None);
    let error = client.from("profiles").select("*").await.expect_err("boom");

    assert_eq!(error.to_string(), "boom");
    assert_eq!(sink.metric_names(), vec!["cacheMiss", "cacheHit", "queryError"]);
}

#[tokio::test]
async fn panicking_sink_never_reaches_caller() {
    let backend = seeded_backend();
    let sink = RecordingSink::with_mode(SinkMode::Panic);
    let client = client_with(&backend, config(0), &sink);

    let read = client.from("teams").select("*").await.expect("read");
    assert_eq!(read.count, Some(2));

    client
        .from("teams")
        .update(json!({ "name": "compilers & tools" }))
        .eq("id", 10)
        .await
        .expect("update");
    assert_eq!(backend.rows("teams")[0]["name"], "compilers & tools");
}

#[tokio::test]
async fn disabled_monitoring_still_caches() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let config = ClientConfig {
        enable_performance_monitoring: false,
        ..ClientConfig::default()
    };
    let client = client_with(&backend, config, &sink);

    client.from("profiles").select("*").await.expect("read");
    client.from("profiles").select("*").await.expect("read");

    assert_eq!(backend.select_calls(), 1);
    assert!(sink.metrics().is_empty());
    assert!(sink.spans().is_empty());
}

#[tokio::test]
async fn uncached_reads_are_timed_not_counted_as_misses() {
    let backend = seeded_backend();
    let sink = RecordingSink::new();
    let config = ClientConfig {
        enable_query_cache: false,
        ..ClientConfig::default()
    };
    let client = client_with(&backend, config, &sink);

    client.from("profiles").select("*").await.expect("read");
    client.from("profiles").select("*").await.expect("read");

    assert_eq!(backend.select_calls(), 2);
    assert_eq!(sink.metric_names(), vec!["queryTime", "queryTime"]);
    assert!(sink.metrics().iter().all(|metric| metric.outcome == CallOutcome::Ok));
}
