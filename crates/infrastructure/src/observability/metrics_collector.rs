//! Metrics collector for data flow execution
//!
//! Handles are resolved once against whatever recorder is installed; without a
//! recorder every call is a no-op.

use metrics::{counter, histogram, Counter, Histogram};
use std::time::Duration;

#[derive(Clone)]
pub struct MetricsCollector {
    runs_started_total: Counter,
    runs_succeeded_total: Counter,
    runs_failed_total: Counter,
    runs_cancelled_total: Counter,

    records_written_total: Counter,
    records_skipped_total: Counter,
    records_updated_total: Counter,

    batch_duration: Histogram,
    heartbeat_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            runs_started_total: counter!("dataflow_runs_started_total"),
            runs_succeeded_total: counter!("dataflow_runs_succeeded_total"),
            runs_failed_total: counter!("dataflow_runs_failed_total"),
            runs_cancelled_total: counter!("dataflow_runs_cancelled_total"),
            records_written_total: counter!("dataflow_records_written_total"),
            records_skipped_total: counter!("dataflow_records_skipped_total"),
            records_updated_total: counter!("dataflow_records_updated_total"),
            batch_duration: histogram!("dataflow_batch_duration_seconds"),
            heartbeat_duration: histogram!("dataflow_heartbeat_duration_seconds"),
        }
    }

    pub fn record_run_started(&self) {
        self.runs_started_total.increment(1);
    }

    pub fn record_run_succeeded(&self, duration: Duration) {
        self.runs_succeeded_total.increment(1);
        self.batch_duration.record(duration.as_secs_f64());
    }

    pub fn record_run_failed(&self, duration: Duration) {
        self.runs_failed_total.increment(1);
        self.batch_duration.record(duration.as_secs_f64());
    }

    pub fn record_runs_cancelled(&self, count: u64) {
        self.runs_cancelled_total.increment(count);
    }

    pub fn record_written(&self, count: u64) {
        self.records_written_total.increment(count);
    }

    pub fn record_skipped(&self, count: u64) {
        self.records_skipped_total.increment(count);
    }

    pub fn record_updated(&self, count: u64) {
        self.records_updated_total.increment(count);
    }

    pub fn record_heartbeat(&self, duration: Duration) {
        self.heartbeat_duration.record(duration.as_secs_f64());
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}
