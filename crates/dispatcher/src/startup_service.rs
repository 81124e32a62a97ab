use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dataflow_config::{FlowDefinition, SchedulerConfig};
use dataflow_domain::{DataFlowRunStatus, RunStatusUpdate};
use dataflow_errors::DataFlowResult;
use dataflow_infrastructure::StructuredLogger;
use tracing::{error, info, warn};

use crate::data_flow_service::DataFlowService;

/// 进程重启时遗留的运行实例的错误信息
pub const INTERRUPTED_MESSAGE: &str = "interrupted";

/// 启动清理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub interrupted: u64,
    pub overdue_cancelled: u64,
    pub scheduled: u64,
    pub registered: usize,
    pub duration_ms: u64,
}

/// 启动时的一次性整理
///
/// 顺序固定：先把遗留的 in_progress 实例标记为失败，再取消过期太久的待运行实例，
/// 然后为缺少未来排期的活跃数据流补一个实例，最后注册配置文件中的数据流。
pub struct StartupService {
    service: Arc<DataFlowService>,
    staleness: Duration,
}

impl StartupService {
    pub fn new(service: Arc<DataFlowService>, config: &SchedulerConfig) -> Self {
        Self {
            service,
            staleness: Duration::seconds(config.staleness_threshold_seconds as i64),
        }
    }

    pub async fn run(
        &self,
        definitions: &[FlowDefinition],
        now: DateTime<Utc>,
    ) -> DataFlowResult<StartupReport> {
        info!("开始启动清理");
        let start = Instant::now();

        let interrupted = self.recover_interrupted(now).await?;
        let overdue_cancelled = self.cancel_overdue(now).await?;
        let scheduled = self.ensure_future_runs(now).await?;
        StructuredLogger::log_startup_sweep(interrupted, overdue_cancelled, scheduled);

        let registered = self.register_definitions(definitions, now).await?;

        Ok(StartupReport {
            interrupted,
            overdue_cancelled,
            scheduled,
            registered,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// 进程退出时仍在运行的实例不会再完成，一律标记为失败
    pub async fn recover_interrupted(&self, now: DateTime<Utc>) -> DataFlowResult<u64> {
        let runs = self.service.runs().find_in_progress().await?;
        let mut recovered = 0;

        for run in runs {
            warn!("运行实例 {} 在上次退出时仍在执行，标记为失败", run.id);
            match self
                .service
                .runs()
                .update_status(
                    run.id,
                    DataFlowRunStatus::Failed,
                    RunStatusUpdate::failed(now, INTERRUPTED_MESSAGE),
                )
                .await
            {
                Ok(_) => {
                    self.service
                        .flows()
                        .record_error(run.data_flow_id, INTERRUPTED_MESSAGE)
                        .await?;
                    recovered += 1;
                }
                Err(e) => error!("恢复运行实例 {} 失败: {}", run.id, e),
            }
        }

        Ok(recovered)
    }

    pub async fn cancel_overdue(&self, now: DateTime<Utc>) -> DataFlowResult<u64> {
        let overdue = self
            .service
            .runs()
            .find_overdue_pending(now - self.staleness)
            .await?;
        if overdue.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = overdue.iter().map(|run| run.id).collect();
        let cancelled = self.service.runs().cancel_runs(&ids).await?;
        StructuredLogger::log_runs_cancelled(None, cancelled, "overdue");
        Ok(cancelled)
    }

    /// 为没有任何待运行实例的活跃数据流在 `now + interval` 补排期
    ///
    /// 清扫后留下的已到期实例会在下一次心跳执行并接着排期，不再另起一条排期链。
    pub async fn ensure_future_runs(&self, now: DateTime<Utc>) -> DataFlowResult<u64> {
        let mut scheduled = 0;
        for flow in self.service.flows().list().await? {
            if !flow.is_active() {
                continue;
            }
            let runs = self.service.runs();
            if runs.has_future_pending(flow.id, now).await?
                || runs.find_earliest_pending(flow.id, now).await?.is_some()
            {
                continue;
            }
            let run = runs.create(flow.id, flow.next_run_after(now)?).await?;
            StructuredLogger::log_run_scheduled(run.id, flow.id, run.run_after);
            scheduled += 1;
        }
        Ok(scheduled)
    }

    async fn register_definitions(
        &self,
        definitions: &[FlowDefinition],
        now: DateTime<Utc>,
    ) -> DataFlowResult<usize> {
        for definition in definitions {
            self.service
                .register(
                    &definition.name,
                    Some(&definition.source),
                    Some(&definition.sink),
                    definition.runtime.as_ref(),
                    now,
                )
                .await?;
        }
        Ok(definitions.len())
    }
}
