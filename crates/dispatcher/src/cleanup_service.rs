use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dataflow_config::SchedulerConfig;
use dataflow_domain::DataFlowRunRepository;
use dataflow_errors::DataFlowResult;
use dataflow_infrastructure::StructuredLogger;

/// 按保留天数删除已结束的运行实例
pub struct RunCleanupService {
    runs: Arc<dyn DataFlowRunRepository>,
    retention: Duration,
}

impl RunCleanupService {
    pub fn new(runs: Arc<dyn DataFlowRunRepository>, config: &SchedulerConfig) -> Self {
        Self {
            runs,
            retention: Duration::days(config.run_retention_days as i64),
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    pub async fn cleanup_old_runs(&self, now: DateTime<Utc>) -> DataFlowResult<u64> {
        let cutoff = self.cutoff(now);
        let deleted = self.runs.delete_finished_before(cutoff).await?;
        StructuredLogger::log_runs_cleaned(deleted, cutoff);
        Ok(deleted)
    }
}
