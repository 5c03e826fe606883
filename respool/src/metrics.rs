//!
//! Metrics sink
//!
//! The metrics sink is an optional external collaborator: the Coordinator
//! only ever calls `notify`, a pluggable recorder so a caller can wire
//! counters/histograms into whatever telemetry system they use.
//!
use std::sync::Arc;

/// The kind of measurement being reported, per the external metrics
/// interface: `type ∈ {counter, histogram, history, meter}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
    History,
    Meter,
}

pub trait MetricsSink: Send + Sync + 'static {
    fn notify(&self, name: &str, value: f64, kind: MetricKind);
}

/// A sink that discards every event. The default when no sink is
/// configured.
#[derive(Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn notify(&self, _name: &str, _value: f64, _kind: MetricKind) {}
}

/// A sink that emits every event through the `log` crate at `trace`
/// level, instead of silently dropping operational signal.
#[derive(Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn notify(&self, name: &str, value: f64, kind: MetricKind) {
        log::trace!("metric {name}={value} ({kind:?})");
    }
}

pub(crate) struct Metrics(Arc<dyn MetricsSink>);

impl Metrics {
    pub(crate) fn new(sink: Option<Arc<dyn MetricsSink>>) -> Self {
        Self(sink.unwrap_or_else(|| Arc::new(NullSink)))
    }

    pub(crate) fn counter(&self, name: &str, value: f64) {
        self.0.notify(name, value, MetricKind::Counter);
    }

    pub(crate) fn histogram(&self, name: &str, value: f64) {
        self.0.notify(name, value, MetricKind::Histogram);
    }

    pub(crate) fn history(&self, name: &str, value: f64) {
        self.0.notify(name, value, MetricKind::History);
    }

    pub(crate) fn meter(&self, name: &str, value: f64) {
        self.0.notify(name, value, MetricKind::Meter);
    }
}
