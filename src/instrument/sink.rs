//! Observability sink: where spans, slow-call warnings and error reports go.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_error::SpanTrace;

use crate::upstream::ErrorCategory;

use super::metrics::{CallKind, CallMetric, METRIC_SINK_FAILURE};
use super::span::SpanRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("sink rejected {event}: {reason}")]
    Rejected { event: &'static str, reason: String },
}

/// Warning raised when a call settles after the slow threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowCall {
    pub kind: CallKind,
    pub table: String,
    pub operation: String,
    pub duration: Duration,
    pub threshold: Duration,
}

/// Context attached to a failed call before its error is handed back.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: CallKind,
    pub table: String,
    pub operation: String,
    pub columns: Option<String>,
    pub duration: Duration,
    pub code: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
    pub span_trace: SpanTrace,
}

/// Receiver for instrumentation events.
///
/// Every method is called on the request path. An `Err` or a panic from any of
/// them is counted and logged, then dropped; it never reaches the caller of
/// the wrapped operation.
pub trait ObservabilitySink: Send + Sync + 'static {
    fn span_finished(&self, _span: &SpanRecord) -> Result<(), SinkError> {
        Ok(())
    }

    fn call_metric(&self, _metric: &CallMetric) -> Result<(), SinkError> {
        Ok(())
    }

    fn slow_call(&self, _warning: &SlowCall) -> Result<(), SinkError> {
        Ok(())
    }

    fn capture_error(&self, _report: &ErrorReport) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that forwards spans and error reports to `tracing`.
///
/// Slow calls are left to the default no-op: the call wrapper already logs
/// them at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn span_finished(&self, span: &SpanRecord) -> Result<(), SinkError> {
        debug!(
            span = span.name.as_str(),
            status = span.status.as_str(),
            elapsed_ms = span.duration.as_secs_f64() * 1000.0,
            "span finished"
        );
        Ok(())
    }

    fn capture_error(&self, report: &ErrorReport) -> Result<(), SinkError> {
        warn!(
            kind = report.kind.as_str(),
            table = report.table.as_str(),
            operation = report.operation.as_str(),
            columns = report.columns.as_deref().unwrap_or(""),
            category = report.category.as_str(),
            code = report.code.as_deref().unwrap_or(""),
            elapsed_ms = report.duration.as_millis() as u64,
            error = report.message.as_str(),
            "call failed\n{}",
            report.span_trace
        );
        Ok(())
    }
}

/// Invoke one sink method, containing both `Err` and panics.
pub(crate) fn deliver<F>(event: &'static str, send: F)
where
    F: FnOnce() -> Result<(), SinkError>,
{
    let failure = match catch_unwind(AssertUnwindSafe(send)) {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };

    counter!(METRIC_SINK_FAILURE, "event" => event).increment(1);
    debug!(
        event,
        error = failure.as_str(),
        "observability sink failed; event dropped"
    );
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
