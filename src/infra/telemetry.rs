use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::instrument::metrics::{
    METRIC_AUTH_ERROR, METRIC_AUTH_TIME_MS, METRIC_CACHE_ENTRIES, METRIC_CACHE_HIT,
    METRIC_CACHE_INVALIDATION, METRIC_CACHE_MISS, METRIC_CALL_CANCELLED, METRIC_MUTATION_ERROR,
    METRIC_MUTATION_TIME_MS, METRIC_QUERY_ERROR, METRIC_QUERY_TIME_MS, METRIC_SINK_FAILURE,
    METRIC_SLOW_CALL, METRIC_STORAGE_ERROR, METRIC_STORAGE_TIME_MS,
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the middleware emits. Safe to call
/// more than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_histogram!(
            METRIC_QUERY_TIME_MS,
            Unit::Milliseconds,
            "Latency of reads executed against the backend."
        );
        describe_histogram!(
            METRIC_MUTATION_TIME_MS,
            Unit::Milliseconds,
            "Latency of inserts, updates, deletes and upserts."
        );
        describe_histogram!(
            METRIC_AUTH_TIME_MS,
            Unit::Milliseconds,
            "Latency of auth calls."
        );
        describe_histogram!(
            METRIC_STORAGE_TIME_MS,
            Unit::Milliseconds,
            "Latency of storage uploads."
        );
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of reads served from cache."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of reads executed against the backend."
        );
        describe_counter!(
            METRIC_QUERY_ERROR,
            Unit::Count,
            "Total number of failed reads."
        );
        describe_counter!(
            METRIC_MUTATION_ERROR,
            Unit::Count,
            "Total number of failed writes."
        );
        describe_counter!(
            METRIC_AUTH_ERROR,
            Unit::Count,
            "Total number of failed auth calls."
        );
        describe_counter!(
            METRIC_STORAGE_ERROR,
            Unit::Count,
            "Total number of failed storage calls."
        );
        describe_counter!(
            METRIC_SLOW_CALL,
            Unit::Count,
            "Total number of calls slower than the configured threshold."
        );
        describe_counter!(
            METRIC_CALL_CANCELLED,
            Unit::Count,
            "Total number of calls dropped or aborted before settling."
        );
        describe_counter!(
            METRIC_SINK_FAILURE,
            Unit::Count,
            "Total number of observability events the sink failed to accept."
        );
        describe_counter!(
            METRIC_CACHE_INVALIDATION,
            Unit::Count,
            "Total number of table-wide invalidations after successful writes."
        );
        describe_gauge!(
            METRIC_CACHE_ENTRIES,
            Unit::Count,
            "Current number of entries in the read cache."
        );
    });
}
