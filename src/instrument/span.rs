use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::sink::{ObservabilitySink, deliver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
    Cancelled,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A finished span as handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub measurements: Vec<(String, f64)>,
    pub status: SpanStatus,
    pub duration: Duration,
}

impl SpanRecord {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn measurement(&self, key: &str) -> Option<f64> {
        self.measurements
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| *value)
    }
}

/// A timed unit of work.
///
/// A span that is dropped without [`Span::end`] is delivered with
/// [`SpanStatus::Cancelled`].
pub struct Span {
    name: String,
    attributes: Vec<(String, String)>,
    measurements: Vec<(String, f64)>,
    started: Instant,
    sink: Arc<dyn ObservabilitySink>,
    ended: bool,
}

impl Span {
    pub(crate) fn start(
        name: impl Into<String>,
        attributes: Vec<(String, String)>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        Self {
            name: name.into(),
            attributes,
            measurements: Vec::new(),
            started: Instant::now(),
            sink,
            ended: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(name, _)| *name == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn record_measurement(&mut self, name: impl Into<String>, value: f64) {
        self.measurements.push((name.into(), value));
    }

    /// Close the span and deliver it. Returns the elapsed time.
    pub fn end(mut self, status: SpanStatus) -> Duration {
        self.finish(status)
    }

    fn finish(&mut self, status: SpanStatus) -> Duration {
        self.ended = true;
        let record = SpanRecord {
            name: std::mem::take(&mut self.name),
            attributes: std::mem::take(&mut self.attributes),
            measurements: std::mem::take(&mut self.measurements),
            status,
            duration: self.started.elapsed(),
        };
        let duration = record.duration;
        let sink = &self.sink;
        deliver("span_finished", || sink.span_finished(&record));
        duration
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if !self.ended {
            self.finish(SpanStatus::Cancelled);
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("measurements", &self.measurements)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::instrument::sink::SinkError;

    #[derive(Default)]
    struct Collect(Mutex<Vec<SpanRecord>>);

    impl ObservabilitySink for Collect {
        fn span_finished(&self, span: &SpanRecord) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(span.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_delivers_attributes_and_measurements() {
        let sink = Arc::new(Collect::default());
        let mut span = Span::start(
            "db.select",
            vec![("table".into(), "profiles".into())],
            sink.clone(),
        );
        span.set_attribute("columns", "*");
        span.set_attribute("table", "accounts");
        tokio::time::advance(Duration::from_millis(25)).await;
        span.record_measurement("rows", 3.0);
        let elapsed = span.end(SpanStatus::Ok);

        assert_eq!(elapsed, Duration::from_millis(25));
        let spans = sink.0.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Ok);
        assert_eq!(spans[0].attribute("table"), Some("accounts"));
        assert_eq!(spans[0].attribute("columns"), Some("*"));
        assert_eq!(spans[0].measurement("rows"), Some(3.0));
    }

    #[tokio::test]
    async fn dropped_span_is_cancelled() {
        let sink = Arc::new(Collect::default());
        drop(Span::start("db.update", Vec::new(), sink.clone()));

        let spans = sink.0.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "db.update");
        assert_eq!(spans[0].status, SpanStatus::Cancelled);
    }
}
