use std::sync::Arc;

use chrono::{DateTime, Utc};
use dataflow_domain::{
    Cursor, DataFlow, DataFlowRepository, DataFlowRun, DataFlowRunRepository, DataFlowRunStatus,
    DataFlowStatus, Descriptor, RunStatusUpdate, RuntimePolicy,
};
use dataflow_errors::{DataFlowError, DataFlowResult};
use dataflow_infrastructure::{MetricsCollector, StructuredLogger};
use serde_json::Value;
use tracing::{debug, error, info, instrument};

/// 数据流的注册、管理操作和运行状态转换
///
/// 所有级联（取消待运行实例、重新排期）都由这里显式调用，仓储层不带任何回调。
pub struct DataFlowService {
    flows: Arc<dyn DataFlowRepository>,
    runs: Arc<dyn DataFlowRunRepository>,
    metrics: Arc<MetricsCollector>,
}

impl DataFlowService {
    pub fn new(
        flows: Arc<dyn DataFlowRepository>,
        runs: Arc<dyn DataFlowRunRepository>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { flows, runs, metrics }
    }

    pub fn flows(&self) -> &Arc<dyn DataFlowRepository> {
        &self.flows
    }

    pub fn runs(&self) -> &Arc<dyn DataFlowRunRepository> {
        &self.runs
    }

    fn require_descriptor(slot: &str, name: &str, value: Option<&Value>) -> DataFlowResult<Value> {
        let value = value.ok_or_else(|| {
            DataFlowError::config_error(format!("数据流 '{name}' 缺少 {slot}"))
        })?;
        Descriptor::from_value(value).map_err(|e| {
            DataFlowError::config_error(format!("数据流 '{name}' 的 {slot} 描述符无效: {e}"))
        })?;
        Ok(value.clone())
    }

    /// 运行时描述符必须带有可用的调度策略
    fn require_runtime(name: &str, runtime: &Value) -> DataFlowResult<()> {
        let descriptor = Descriptor::from_value(runtime).map_err(|e| {
            DataFlowError::config_error(format!("数据流 '{name}' 的 runtime 描述符无效: {e}"))
        })?;
        RuntimePolicy::from_options(&descriptor.options)
            .validate()
            .map_err(|e| {
                DataFlowError::config_error(format!("数据流 '{name}' 的运行策略无效: {e}"))
            })
    }

    /// 按名称幂等注册。首次创建时安排初始运行；已存在且运行时变化时重新排期
    #[instrument(skip(self, source, sink, runtime))]
    pub async fn register(
        &self,
        name: &str,
        source: Option<&Value>,
        sink: Option<&Value>,
        runtime: Option<&Value>,
        now: DateTime<Utc>,
    ) -> DataFlowResult<DataFlow> {
        if name.trim().is_empty() {
            return Err(DataFlowError::config_error("数据流名称不能为空"));
        }
        let source = Self::require_descriptor("source", name, source)?;
        let sink = Self::require_descriptor("sink", name, sink)?;
        if let Some(runtime) = runtime {
            Self::require_runtime(name, runtime)?;
        }

        let previous_runtime = self
            .flows
            .get_by_name(name)
            .await?
            .map(|flow| flow.runtime);

        let (flow, created) = self
            .flows
            .upsert_by_name(name, &source, &sink, runtime)
            .await?;

        if created {
            let run = self.runs.create(flow.id, flow.initial_run_after(now)?).await?;
            StructuredLogger::log_run_scheduled(run.id, flow.id, run.run_after);
        } else if previous_runtime.as_ref() != Some(&flow.runtime) {
            info!("数据流 {} 的运行时已变化，重新排期", flow.name);
            self.on_runtime_or_status_change(&flow, now).await?;
        }

        StructuredLogger::log_flow_registered(flow.id, &flow.name, created, flow.is_enabled());
        Ok(flow)
    }

    /// 策略或状态变化后的级联：保证最多只有一个反映当前策略的待运行实例
    pub async fn on_runtime_or_status_change(
        &self,
        flow: &DataFlow,
        now: DateTime<Utc>,
    ) -> DataFlowResult<Option<DataFlowRun>> {
        if flow.is_active() && flow.is_enabled() {
            let cancelled = self.runs.cancel_pending(flow.id).await?;
            self.record_cancelled(flow.id, cancelled, "policy_changed");
            self.schedule_next_run(flow, now).await
        } else if !flow.is_active() {
            let cancelled = self.runs.cancel_pending(flow.id).await?;
            self.record_cancelled(flow.id, cancelled, "deactivated");
            Ok(None)
        } else {
            debug!("数据流 {} 未启用自动调度，保留现有排期", flow.name);
            Ok(None)
        }
    }

    /// 在 `from + interval` 创建待运行实例；未启用时不做任何事
    pub async fn schedule_next_run(
        &self,
        flow: &DataFlow,
        from: DateTime<Utc>,
    ) -> DataFlowResult<Option<DataFlowRun>> {
        if !flow.is_enabled() {
            return Ok(None);
        }
        let run = self.runs.create(flow.id, flow.next_run_after(from)?).await?;
        StructuredLogger::log_run_scheduled(run.id, flow.id, run.run_after);
        Ok(Some(run))
    }

    /// 认领运行实例并立即安排下一次运行
    ///
    /// 认领失败返回 `ClaimConflict`，调用方应静默跳过。认领成功后的任何错误
    /// 都会先把实例标记为失败再返回，实例不会滞留在 in_progress。
    pub async fn mark_run_started(
        &self,
        flow: &DataFlow,
        run: &DataFlowRun,
        now: DateTime<Utc>,
    ) -> DataFlowResult<DataFlowRun> {
        if !self.runs.claim(run.id, now).await? {
            return Err(DataFlowError::ClaimConflict { run_id: run.id });
        }
        if let Err(e) = self.after_claim(flow, now).await {
            self.fail_claimed_run(flow, run, &e.to_string()).await;
            return Err(e);
        }

        self.metrics.record_run_started();
        StructuredLogger::log_run_started(run.id, flow.id, &flow.name);

        let mut started = run.clone();
        started.status = DataFlowRunStatus::InProgress;
        started.started_at = Some(now);
        Ok(started)
    }

    async fn after_claim(&self, flow: &DataFlow, now: DateTime<Utc>) -> DataFlowResult<()> {
        self.flows.record_run_started(flow.id, now).await?;
        self.schedule_next_run(flow, now).await?;
        Ok(())
    }

    /// 尽力将已认领的实例标记为失败；连失败状态都写不进去时只记录日志，
    /// 留给下次启动的中断恢复处理
    pub async fn fail_claimed_run(&self, flow: &DataFlow, run: &DataFlowRun, message: &str) {
        if let Err(e) = self.mark_run_failed(flow, run, message).await {
            error!("无法将运行实例 {} 标记为失败: {}", run.id, e);
        }
    }

    pub async fn mark_run_completed(&self, run: &DataFlowRun) -> DataFlowResult<DataFlowRun> {
        self.runs
            .update_status(run.id, DataFlowRunStatus::Success, RunStatusUpdate::ended(Utc::now()))
            .await
    }

    pub async fn mark_run_failed(
        &self,
        flow: &DataFlow,
        run: &DataFlowRun,
        message: &str,
    ) -> DataFlowResult<DataFlowRun> {
        let failed = self
            .runs
            .update_status(
                run.id,
                DataFlowRunStatus::Failed,
                RunStatusUpdate::failed(Utc::now(), message),
            )
            .await?;
        self.flows.record_error(flow.id, message).await?;
        StructuredLogger::log_run_failed(run.id, &flow.name, message);
        Ok(failed)
    }

    pub async fn advance_cursor(&self, flow: &DataFlow, last_id: &Cursor) -> DataFlowResult<()> {
        self.flows.update_cursor(flow.id, last_id).await?;
        info!("数据流 {} 游标推进到 {}", flow.name, last_id);
        Ok(())
    }

    async fn load(&self, id: i64) -> DataFlowResult<DataFlow> {
        self.flows
            .get_by_id(id)
            .await?
            .ok_or_else(|| DataFlowError::data_flow_not_found(id))
    }

    async fn set_status(&self, id: i64, status: DataFlowStatus, now: DateTime<Utc>) -> DataFlowResult<DataFlow> {
        let mut flow = self.load(id).await?;
        if flow.status == status {
            return Ok(flow);
        }
        flow.status = status;
        let flow = self.flows.update(&flow).await?;
        self.on_runtime_or_status_change(&flow, now).await?;
        Ok(flow)
    }

    pub async fn enable(&self, id: i64, now: DateTime<Utc>) -> DataFlowResult<DataFlow> {
        self.set_status(id, DataFlowStatus::Active, now).await
    }

    pub async fn disable(&self, id: i64, now: DateTime<Utc>) -> DataFlowResult<DataFlow> {
        self.set_status(id, DataFlowStatus::Inactive, now).await
    }

    pub async fn update_runtime(
        &self,
        id: i64,
        runtime: Option<Value>,
        now: DateTime<Utc>,
    ) -> DataFlowResult<DataFlow> {
        let mut flow = self.load(id).await?;
        if let Some(runtime) = &runtime {
            Self::require_runtime(&flow.name, runtime)?;
        }
        if flow.runtime == runtime {
            return Ok(flow);
        }
        flow.runtime = runtime;
        let flow = self.flows.update(&flow).await?;
        self.on_runtime_or_status_change(&flow, now).await?;
        Ok(flow)
    }

    pub async fn delete(&self, id: i64) -> DataFlowResult<bool> {
        self.flows.delete(id).await
    }

    /// 手动触发：在当前时刻创建一个待运行实例，下一次心跳执行
    pub async fn trigger_now(&self, id: i64, now: DateTime<Utc>) -> DataFlowResult<DataFlowRun> {
        let flow = self.load(id).await?;
        if !flow.is_active() {
            return Err(DataFlowError::validation_error(format!(
                "数据流 {} 未激活，无法手动触发",
                flow.name
            )));
        }
        let run = self.runs.create(flow.id, now).await?;
        StructuredLogger::log_run_scheduled(run.id, flow.id, run.run_after);
        Ok(run)
    }

    fn record_cancelled(&self, data_flow_id: i64, cancelled: u64, reason: &str) {
        self.metrics.record_runs_cancelled(cancelled);
        StructuredLogger::log_runs_cancelled(Some(data_flow_id), cancelled, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dataflow_testing_utils::{mock_repositories, MockDataFlowRunRepository};
    use serde_json::json;
    use tracing_test::traced_test;

    fn service() -> (DataFlowService, MockDataFlowRunRepository) {
        let (flows, runs) = mock_repositories();
        let service = DataFlowService::new(
            Arc::new(flows),
            Arc::new(runs.clone()),
            Arc::new(MetricsCollector::new()),
        );
        (service, runs)
    }

    fn source() -> Value {
        json!({"type_tag": "inline", "records": [{"id": 1}]})
    }

    fn sink() -> Value {
        json!({"type_tag": "log"})
    }

    fn runtime(interval: u64, enabled: bool) -> Value {
        json!({"type_tag": "default", "interval": interval, "batch_size": 3, "enabled": enabled})
    }

    #[tokio::test]
    async fn test_register_requires_source_and_sink() {
        let (service, _) = service();
        let now = Utc::now();

        let err = service
            .register("users", None, Some(&sink()), None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, DataFlowError::Configuration(_)));
        assert!(err.is_fatal());

        let err = service
            .register("users", Some(&source()), None, None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, DataFlowError::Configuration(ref m) if m.contains("sink")));

        let err = service
            .register("users", Some(&json!({"records": []})), Some(&sink()), None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, DataFlowError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_register_is_idempotent_and_schedules_initial_run() {
        let (service, runs) = service();
        let now = Utc::now();
        let rt = runtime(60, true);

        let first = service
            .register("users", Some(&source()), Some(&sink()), Some(&rt), now)
            .await
            .unwrap();
        let second = service
            .register("users", Some(&source()), Some(&sink()), Some(&rt), now)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(service.flows().list().await.unwrap().len(), 1);

        let pending = runs.runs_for(first.id, DataFlowRunStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_after, now);
    }

    #[tokio::test]
    async fn test_register_disabled_flow_defers_initial_run() {
        let (service, runs) = service();
        let now = Utc::now();
        let flow = service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(120, false)), now)
            .await
            .unwrap();

        let pending = runs.runs_for(flow.id, DataFlowRunStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_after, now + Duration::seconds(120));
    }

    #[tokio::test]
    async fn test_reregister_with_new_runtime_reschedules() {
        let (service, runs) = service();
        let now = Utc::now();
        let flow = service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(60, true)), now)
            .await
            .unwrap();

        service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(300, true)), now)
            .await
            .unwrap();

        let pending = runs.runs_for(flow.id, DataFlowRunStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_after, now + Duration::seconds(300));
        assert_eq!(runs.runs_for(flow.id, DataFlowRunStatus::Cancelled).len(), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_reregister_with_same_runtime_does_not_reschedule() {
        let (service, runs) = service();
        let now = Utc::now();
        let rt = runtime(60, true);
        service
            .register("users", Some(&source()), Some(&sink()), Some(&rt), now)
            .await
            .unwrap();
        service
            .register("users", Some(&source()), Some(&sink()), Some(&rt), now)
            .await
            .unwrap();

        assert_eq!(runs.count(), 1);
        assert!(!logs_contain("运行时已变化"));

        service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(90, true)), now)
            .await
            .unwrap();
        assert!(logs_contain("运行时已变化"));
    }

    #[tokio::test]
    async fn test_register_rejects_out_of_range_interval() {
        let (service, runs) = service();
        let now = Utc::now();
        let huge = runtime(10_000_000_000_000, true);

        let err = service
            .register("huge", Some(&source()), Some(&sink()), Some(&huge), now)
            .await
            .unwrap_err();
        assert!(matches!(err, DataFlowError::Configuration(ref m) if m.contains("interval")));
        assert_eq!(service.flows().list().await.unwrap().len(), 0);
        assert_eq!(runs.count(), 0);

        let flow = service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(60, true)), now)
            .await
            .unwrap();
        assert!(service.update_runtime(flow.id, Some(huge), now).await.is_err());
        assert_eq!(service.flows().get_by_id(flow.id).await.unwrap().unwrap().interval(), Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_disable_cancels_pending_and_enable_reschedules() {
        let (service, runs) = service();
        let now = Utc::now();
        let flow = service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(60, true)), now)
            .await
            .unwrap();
        service.trigger_now(flow.id, now).await.unwrap();

        let disabled = service.disable(flow.id, now).await.unwrap();
        assert!(!disabled.is_active());
        assert!(runs.runs_for(flow.id, DataFlowRunStatus::Pending).is_empty());
        assert_eq!(runs.runs_for(flow.id, DataFlowRunStatus::Cancelled).len(), 2);
        assert!(service.trigger_now(flow.id, now).await.is_err());

        service.enable(flow.id, now).await.unwrap();
        let pending = runs.runs_for(flow.id, DataFlowRunStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_after, now + Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_update_runtime_to_disabled_keeps_existing_schedule() {
        let (service, runs) = service();
        let now = Utc::now();
        let flow = service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(60, true)), now)
            .await
            .unwrap();

        let updated = service
            .update_runtime(flow.id, Some(runtime(60, false)), now)
            .await
            .unwrap();
        assert!(!updated.is_enabled());
        assert_eq!(runs.runs_for(flow.id, DataFlowRunStatus::Pending).len(), 1);

        assert!(service
            .update_runtime(flow.id, Some(json!("bad")), now)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_schedule_next_run_is_noop_when_not_enabled() {
        let (service, runs) = service();
        let now = Utc::now();
        let flow = service
            .register("users", Some(&source()), Some(&sink()), None, now)
            .await
            .unwrap();
        let before = runs.count();
        assert!(service.schedule_next_run(&flow, now).await.unwrap().is_none());
        assert_eq!(runs.count(), before);
    }

    #[tokio::test]
    async fn test_mark_run_started_claims_and_schedules_next() {
        let (service, runs) = service();
        let now = Utc::now();
        let flow = service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(60, true)), now)
            .await
            .unwrap();
        let run = runs.runs_for(flow.id, DataFlowRunStatus::Pending).remove(0);

        let started = service.mark_run_started(&flow, &run, now).await.unwrap();
        assert!(started.is_in_progress());

        let pending = runs.runs_for(flow.id, DataFlowRunStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_after, now + Duration::seconds(60));
        let stored = service.flows().get_by_id(flow.id).await.unwrap().unwrap();
        assert_eq!(stored.last_run_at, Some(now));

        let err = service.mark_run_started(&flow, &run, now).await.unwrap_err();
        assert!(err.is_skippable());
    }

    #[tokio::test]
    async fn test_mark_run_started_fails_run_when_bookkeeping_errors() {
        let (flows, runs) = mock_repositories();
        let service = DataFlowService::new(
            Arc::new(flows.clone()),
            Arc::new(runs.clone()),
            Arc::new(MetricsCollector::new()),
        );
        let now = Utc::now();
        let flow = service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(60, true)), now)
            .await
            .unwrap();
        let run = runs.runs_for(flow.id, DataFlowRunStatus::Pending).remove(0);

        flows.fail_on("record_run_started");
        let err = service.mark_run_started(&flow, &run, now).await.unwrap_err();
        assert!(matches!(err, DataFlowError::DatabaseOperation(_)));
        assert!(!err.is_skippable());

        let failed = runs.runs_for(flow.id, DataFlowRunStatus::Failed);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error_message.as_deref().unwrap().contains("record_run_started"));
        assert!(runs.runs_for(flow.id, DataFlowRunStatus::InProgress).is_empty());
        let stored = service.flows().get_by_id(flow.id).await.unwrap().unwrap();
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn test_mark_run_failed_records_error_on_flow() {
        let (service, runs) = service();
        let now = Utc::now();
        let flow = service
            .register("users", Some(&source()), Some(&sink()), Some(&runtime(60, true)), now)
            .await
            .unwrap();
        let run = runs.runs_for(flow.id, DataFlowRunStatus::Pending).remove(0);
        service.mark_run_started(&flow, &run, now).await.unwrap();

        let failed = service.mark_run_failed(&flow, &run, "boom").await.unwrap();
        assert_eq!(failed.status, DataFlowRunStatus::Failed);
        let stored = service.flows().get_by_id(flow.id).await.unwrap().unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
    }
}
