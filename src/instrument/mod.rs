//! Call instrumentation.
//!
//! Every wrapped call is measured from just before the backend is invoked
//! until its future settles. The measurement becomes a span, a [`CallMetric`]
//! and, for failures, an [`ErrorReport`]; a call slower than the configured
//! threshold also raises a [`SlowCall`] warning. None of this can change what
//! the caller receives.

pub mod metrics;
mod sink;
mod span;

use std::sync::Arc;
use std::time::Duration;

use ::metrics::counter;
use tracing::{debug, info_span, warn};
use tracing_error::SpanTrace;

use crate::cache::ClientConfig;
use crate::upstream::{ErrorCategory, MutationKind, UpstreamFailure};

pub use self::metrics::{CallKind, CallMetric, CallOutcome};
pub use sink::{ErrorReport, ObservabilitySink, SinkError, SlowCall, TracingSink};
pub use span::{Span, SpanRecord, SpanStatus};

use self::metrics::METRIC_SLOW_CALL;
use sink::deliver;

/// What is being called, attached to every span, metric and report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub kind: CallKind,
    pub table: String,
    pub operation: String,
    pub columns: Option<String>,
}

impl CallContext {
    pub fn query(table: &str, columns: &str) -> Self {
        Self {
            kind: CallKind::Query,
            table: table.to_string(),
            operation: crate::cache::SELECT_OPERATION.to_string(),
            columns: Some(columns.to_string()),
        }
    }

    pub fn mutation(table: &str, kind: MutationKind, returning: Option<&str>) -> Self {
        Self {
            kind: CallKind::Mutation,
            table: table.to_string(),
            operation: kind.as_str().to_string(),
            columns: returning.map(str::to_string),
        }
    }

    pub fn auth(operation: &str) -> Self {
        Self {
            kind: CallKind::Auth,
            table: "auth".to_string(),
            operation: operation.to_string(),
            columns: None,
        }
    }

    pub fn storage(bucket: &str, operation: &str) -> Self {
        Self {
            kind: CallKind::Storage,
            table: bucket.to_string(),
            operation: operation.to_string(),
            columns: None,
        }
    }

    /// `tracing` span the wrapped future runs inside.
    pub fn tracing_span(&self) -> tracing::Span {
        info_span!(
            "veneer.call",
            kind = self.kind.as_str(),
            table = %self.table,
            operation = %self.operation,
            columns = self.columns.as_deref().unwrap_or(""),
        )
    }

    fn span_name(&self) -> String {
        format!("{}.{}", self.kind.as_str(), self.operation)
    }

    fn attributes(&self) -> Vec<(String, String)> {
        let mut attributes = vec![
            ("table".to_string(), self.table.clone()),
            ("operation".to_string(), self.operation.clone()),
        ];
        if let Some(columns) = &self.columns {
            attributes.push(("columns".to_string(), columns.clone()));
        }
        attributes
    }
}

/// Span, metric and slow-call recording for one client.
#[derive(Clone)]
pub struct Instrumentation {
    enabled: bool,
    slow_threshold: Duration,
    sink: Arc<dyn ObservabilitySink>,
}

impl Instrumentation {
    pub fn new(config: &ClientConfig, sink: Arc<dyn ObservabilitySink>) -> Self {
        Self {
            enabled: config.enable_performance_monitoring,
            slow_threshold: config.slow_query_threshold(),
            sink,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Open a free-standing span. It is delivered to the sink on
    /// [`Span::end`], or as cancelled if dropped.
    pub fn start_span<I, K, V>(&self, name: impl Into<String>, attributes: I) -> Span
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let attributes = attributes
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Span::start(name, attributes, Arc::clone(&self.sink))
    }

    /// Start timing a call. The clock starts now.
    pub fn begin(&self, context: CallContext) -> CallGuard {
        if !self.enabled {
            return CallGuard { active: None };
        }

        let span = Span::start(
            context.span_name(),
            context.attributes(),
            Arc::clone(&self.sink),
        );
        CallGuard {
            active: Some(ActiveCall {
                context,
                span,
                slow_threshold: self.slow_threshold,
                sink: Arc::clone(&self.sink),
            }),
        }
    }

    /// Record a read served from cache.
    pub fn cache_hit(&self, context: &CallContext) {
        if !self.enabled {
            return;
        }

        debug!(table = %context.table, columns = ?context.columns, "cache hit");
        let metric = CallMetric::new(
            context.kind,
            context.table.clone(),
            context.operation.clone(),
            0.0,
            CallOutcome::Hit,
        );
        self::metrics::record(&metric, None);
        let sink = &self.sink;
        deliver("call_metric", || sink.call_metric(&metric));
    }
}

impl std::fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentation")
            .field("enabled", &self.enabled)
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}

/// An in-flight measured call.
///
/// Settle it with [`CallGuard::succeed`] or [`CallGuard::fail`]. A guard that
/// is dropped unsettled, because the future driving the call was dropped, is
/// recorded as cancelled.
#[must_use = "an unsettled call guard records the call as cancelled"]
pub struct CallGuard {
    active: Option<ActiveCall>,
}

impl CallGuard {
    pub fn succeed(mut self, outcome: CallOutcome) {
        if let Some(active) = self.active.take() {
            active.settle(outcome, None);
        }
    }

    /// Record `error` against the call. Cancellation errors are recorded as
    /// cancelled, not failed.
    pub fn fail<E>(mut self, error: &E)
    where
        E: UpstreamFailure + ?Sized,
    {
        let Some(active) = self.active.take() else {
            return;
        };

        if error.is_cancelled() {
            active.settle(CallOutcome::Cancelled, None);
        } else {
            active.settle(
                CallOutcome::Error,
                Some(Failure {
                    code: error.code().map(str::to_string),
                    category: error.category(),
                    message: error.to_string(),
                }),
            );
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.settle(CallOutcome::Cancelled, None);
        }
    }
}

struct Failure {
    code: Option<String>,
    category: ErrorCategory,
    message: String,
}

struct ActiveCall {
    context: CallContext,
    span: Span,
    slow_threshold: Duration,
    sink: Arc<dyn ObservabilitySink>,
}

impl ActiveCall {
    fn settle(self, outcome: CallOutcome, failure: Option<Failure>) {
        let Self {
            context,
            mut span,
            slow_threshold,
            sink,
        } = self;

        let elapsed = span.elapsed();
        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        span.record_measurement("duration_ms", duration_ms);
        span.set_attribute("outcome", outcome.as_str());
        if let Some(failure) = &failure {
            span.set_attribute("error.category", failure.category.as_str());
            if let Some(code) = &failure.code {
                span.set_attribute("error.code", code.as_str());
            }
        }
        span.end(match outcome {
            CallOutcome::Error => SpanStatus::Error,
            CallOutcome::Cancelled => SpanStatus::Cancelled,
            _ => SpanStatus::Ok,
        });

        let metric = CallMetric::new(
            context.kind,
            context.table.clone(),
            context.operation.clone(),
            duration_ms,
            outcome,
        );
        self::metrics::record(
            &metric,
            failure.as_ref().map(|failure| failure.category.as_str()),
        );
        deliver("call_metric", || sink.call_metric(&metric));

        if outcome == CallOutcome::Cancelled {
            debug!(
                table = %context.table,
                operation = %context.operation,
                elapsed_ms = duration_ms,
                "call cancelled"
            );
            return;
        }

        if let Some(failure) = failure {
            let report = ErrorReport {
                kind: context.kind,
                table: context.table.clone(),
                operation: context.operation.clone(),
                columns: context.columns.clone(),
                duration: elapsed,
                code: failure.code,
                category: failure.category,
                message: failure.message,
                span_trace: SpanTrace::capture(),
            };
            deliver("capture_error", || sink.capture_error(&report));
        }

        if elapsed > slow_threshold {
            warn!(
                table = %context.table,
                operation = %context.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = slow_threshold.as_millis() as u64,
                "slow call"
            );
            counter!(
                METRIC_SLOW_CALL,
                "kind" => context.kind.as_str(),
                "table" => context.table.clone(),
                "operation" => context.operation.clone()
            )
            .increment(1);
            let warning = SlowCall {
                kind: context.kind,
                table: context.table,
                operation: context.operation,
                duration: elapsed,
                threshold: slow_threshold,
            };
            deliver("slow_call", || sink.slow_call(&warning));
        }
    }
}
