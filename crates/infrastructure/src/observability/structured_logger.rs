//! Structured logging utilities
//!
//! Every helper emits a single event with a stable `event = "..."` field so the
//! JSON output can be filtered by event type.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_flow_registered(data_flow_id: i64, name: &str, created: bool, enabled: bool) {
        info!(
            event = "flow_registered",
            data_flow.id = data_flow_id,
            data_flow.name = name,
            data_flow.created = created,
            data_flow.enabled = enabled,
            "Data flow registered"
        );
    }

    pub fn log_run_scheduled(run_id: i64, data_flow_id: i64, run_after: DateTime<Utc>) {
        debug!(
            event = "run_scheduled",
            run.id = run_id,
            data_flow.id = data_flow_id,
            run.run_after = %run_after,
            "Data flow run scheduled"
        );
    }

    pub fn log_run_started(run_id: i64, data_flow_id: i64, name: &str) {
        info!(
            event = "run_started",
            run.id = run_id,
            data_flow.id = data_flow_id,
            data_flow.name = name,
            "Data flow run started"
        );
    }

    pub fn log_run_completed(run_id: i64, name: &str, records: usize, duration_ms: u64) {
        info!(
            event = "run_completed",
            run.id = run_id,
            data_flow.name = name,
            run.records = records,
            run.duration_ms = duration_ms,
            "Data flow run completed"
        );
    }

    pub fn log_run_failed(run_id: i64, name: &str, error_message: &str) {
        error!(
            event = "run_failed",
            run.id = run_id,
            data_flow.name = name,
            run.error = error_message,
            "Data flow run failed"
        );
    }

    pub fn log_runs_cancelled(data_flow_id: Option<i64>, count: u64, reason: &str) {
        if count == 0 {
            return;
        }
        info!(
            event = "runs_cancelled",
            data_flow.id = data_flow_id,
            run.count = count,
            cancel.reason = reason,
            "Pending runs cancelled"
        );
    }

    /// Log a descriptor that could not be turned back into a connector
    pub fn log_rehydration_failure(data_flow_id: i64, slot: &str, error: &dyn std::error::Error) {
        warn!(
            event = "rehydration_failed",
            data_flow.id = data_flow_id,
            descriptor.slot = slot,
            error.message = %error,
            "Descriptor could not be rehydrated"
        );
    }

    pub fn log_startup_sweep(interrupted: u64, overdue_cancelled: u64, scheduled: u64) {
        info!(
            event = "startup_sweep",
            sweep.interrupted = interrupted,
            sweep.overdue_cancelled = overdue_cancelled,
            sweep.scheduled = scheduled,
            "Startup sweep finished"
        );
    }

    pub fn log_heartbeat(due: usize, succeeded: usize, failed: usize, skipped: usize, duration_ms: u64) {
        debug!(
            event = "heartbeat",
            heartbeat.due = due,
            heartbeat.succeeded = succeeded,
            heartbeat.failed = failed,
            heartbeat.skipped = skipped,
            heartbeat.duration_ms = duration_ms,
            "Heartbeat cycle finished"
        );
    }

    pub fn log_runs_cleaned(deleted: u64, cutoff: DateTime<Utc>) {
        info!(
            event = "runs_cleaned",
            cleanup.deleted = deleted,
            cleanup.cutoff = %cutoff,
            "Finished runs cleaned up"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_events_carry_event_field() {
        StructuredLogger::log_flow_registered(1, "users", true, false);
        StructuredLogger::log_run_failed(3, "users", "boom");
        StructuredLogger::log_runs_cancelled(Some(1), 0, "disabled");

        assert!(logs_contain("flow_registered"));
        assert!(logs_contain("run_failed"));
        assert!(logs_contain("boom"));
        // 数量为零时不输出
        assert!(!logs_contain("runs_cancelled"));
    }
}
