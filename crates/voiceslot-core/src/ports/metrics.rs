//! Narrow metrics-emission hook standing in for the reference system's
//! decorator-based APM counters (`voice.process.dispatch_allocation`, queue
//! requeue counts). No concrete vendor is named by the external interfaces,
//! so this stays a trait; the default implementation folds counters into
//! `tracing` events, which is itself a legitimate emission path for anyone
//! scraping structured logs.

pub trait MetricsSink: Send + Sync {
    fn incr(&self, name: &'static str, by: u64);
}

/// Emits counters as `tracing` events at `debug` level.
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn incr(&self, name: &'static str, by: u64) {
        tracing::debug!(target: "voiceslot.metrics", metric = name, value = by);
    }
}
