use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dataflow_domain::DataFlow;
use dataflow_errors::{DataFlowError, DataFlowResult};
use dataflow_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::batch_executor::BatchExecutor;
use crate::data_flow_service::DataFlowService;

/// 单个数据流在一次心跳中的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTick {
    Succeeded,
    Failed,
    /// 没有到期实例，或实例已被其他心跳认领
    Skipped,
}

/// 一次心跳的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl HeartbeatReport {
    fn tally(&mut self, tick: FlowTick) {
        match tick {
            FlowTick::Succeeded => self.succeeded += 1,
            FlowTick::Failed => self.failed += 1,
            FlowTick::Skipped => self.skipped += 1,
        }
    }
}

/// 周期心跳：找出有到期实例的数据流并逐个执行一批
///
/// 单个数据流的失败只记录在其运行实例上，不影响同一心跳中的其他数据流。
pub struct HeartbeatScheduler {
    service: Arc<DataFlowService>,
    executor: Arc<BatchExecutor>,
    metrics: Arc<MetricsCollector>,
}

impl HeartbeatScheduler {
    pub fn new(
        service: Arc<DataFlowService>,
        executor: Arc<BatchExecutor>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            service,
            executor,
            metrics,
        }
    }

    pub async fn heartbeat(&self, now: DateTime<Utc>) -> DataFlowResult<HeartbeatReport> {
        let start = Instant::now();
        let due = self.service.flows().find_due(now).await?;
        let mut report = HeartbeatReport {
            due: due.len(),
            ..HeartbeatReport::default()
        };

        for flow in &due {
            let span = info_span!("data_flow_tick", data_flow.id = flow.id, data_flow.name = %flow.name);
            let tick = match self.tick(flow, now).instrument(span).await {
                Ok(tick) => tick,
                Err(e) => {
                    error!("数据流 {} 的心跳处理出错: {}", flow.name, e);
                    FlowTick::Failed
                }
            };
            report.tally(tick);
        }

        let elapsed = start.elapsed();
        self.metrics.record_heartbeat(elapsed);
        StructuredLogger::log_heartbeat(
            report.due,
            report.succeeded,
            report.failed,
            report.skipped,
            elapsed.as_millis() as u64,
        );
        Ok(report)
    }

    async fn tick(&self, flow: &DataFlow, now: DateTime<Utc>) -> DataFlowResult<FlowTick> {
        let Some(run) = self.service.runs().find_earliest_pending(flow.id, now).await? else {
            debug!("数据流 {} 已没有到期实例", flow.name);
            return Ok(FlowTick::Skipped);
        };

        let run = match self.service.mark_run_started(flow, &run, now).await {
            Ok(run) => run,
            Err(e) if e.is_skippable() => {
                debug!("跳过运行实例 {}: {}", run.id, e);
                return Ok(FlowTick::Skipped);
            }
            Err(e) => return Err(e),
        };

        let started = Instant::now();
        // 完成状态写入失败同样按运行失败处理
        let result = async {
            let outcome = self.executor.execute(flow, &run).await?;
            self.service.mark_run_completed(&run).await?;
            Ok::<_, DataFlowError>(outcome)
        }
        .await;

        match result {
            Ok(outcome) => {
                self.metrics.record_run_succeeded(started.elapsed());
                StructuredLogger::log_run_completed(
                    run.id,
                    &flow.name,
                    outcome.processed,
                    started.elapsed().as_millis() as u64,
                );
                Ok(FlowTick::Succeeded)
            }
            Err(e) => {
                warn!("数据流 {} 的运行实例 {} 执行失败: {}", flow.name, run.id, e);
                self.service.fail_claimed_run(flow, &run, &e.to_string()).await;
                self.metrics.record_run_failed(started.elapsed());
                Ok(FlowTick::Failed)
            }
        }
    }
}
