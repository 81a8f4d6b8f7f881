#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::json;
use veneer::cache::ClientConfig;
use veneer::client::Client;
use veneer::instrument::{
    CallMetric, ErrorReport, ObservabilitySink, SinkError, SlowCall, SpanRecord,
};
use veneer::upstream::memory::MemoryBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    #[default]
    Accept,
    Reject,
    Panic,
}

/// Sink that keeps every event it is handed. In `Reject` and `Panic` mode it
/// still records, then fails.
#[derive(Default)]
pub struct RecordingSink {
    mode: SinkMode,
    spans: Mutex<Vec<SpanRecord>>,
    metrics: Mutex<Vec<CallMetric>>,
    slow: Mutex<Vec<SlowCall>>,
    errors: Mutex<Vec<ErrorReport>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_mode(mode: SinkMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            ..Self::default()
        })
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().expect("spans").clone()
    }

    pub fn metrics(&self) -> Vec<CallMetric> {
        self.metrics.lock().expect("metrics").clone()
    }

    pub fn metric_names(&self) -> Vec<&'static str> {
        self.metrics().iter().map(|metric| metric.name).collect()
    }

    pub fn slow_calls(&self) -> Vec<SlowCall> {
        self.slow.lock().expect("slow").clone()
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.errors.lock().expect("errors").clone()
    }

    fn outcome(&self, event: &'static str) -> Result<(), SinkError> {
        match self.mode {
            SinkMode::Accept => Ok(()),
            SinkMode::Reject => Err(SinkError::Rejected {
                event,
                reason: "collector offline".to_string(),
            }),
            SinkMode::Panic => panic!("sink blew up on {event}"),
        }
    }
}

impl ObservabilitySink for RecordingSink {
    fn span_finished(&self, span: &SpanRecord) -> Result<(), SinkError> {
        self.spans.lock().expect("spans").push(span.clone());
        self.outcome("span_finished")
    }

    fn call_metric(&self, metric: &CallMetric) -> Result<(), SinkError> {
        self.metrics.lock().expect("metrics").push(metric.clone());
        self.outcome("call_metric")
    }

    fn slow_call(&self, warning: &SlowCall) -> Result<(), SinkError> {
        self.slow.lock().expect("slow").push(warning.clone());
        self.outcome("slow_call")
    }

    fn capture_error(&self, report: &ErrorReport) -> Result<(), SinkError> {
        self.errors.lock().expect("errors").push(report.clone());
        self.outcome("capture_error")
    }
}

pub fn seeded_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        "profiles",
        [
            json!({ "id": 1, "name": "Ada", "team": 10 }),
            json!({ "id": 2, "name": "Grace", "team": 10 }),
            json!({ "id": 3, "name": "Linus", "team": 20 }),
        ],
    );
    backend.seed(
        "teams",
        [
            json!({ "id": 10, "name": "compilers" }),
            json!({ "id": 20, "name": "kernels" }),
        ],
    );
    backend
}

pub fn client_with(
    backend: &Arc<MemoryBackend>,
    config: ClientConfig,
    sink: &Arc<RecordingSink>,
) -> Client<MemoryBackend> {
    Client::with_sink(Arc::clone(backend), config, sink.clone())
}
