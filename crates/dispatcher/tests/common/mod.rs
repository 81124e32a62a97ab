#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use dataflow_dispatcher::{BatchExecutor, DataFlowService, HeartbeatScheduler};
use dataflow_domain::{DataFlow, DataFlowRun, DataFlowRunStatus};
use dataflow_infrastructure::MetricsCollector;
use dataflow_testing_utils::{
    mock_repositories, MockDataFlowRepository, MockDataFlowRunRepository, TestConnectors,
};

/// 基于内存仓储和测试连接器装配好的调度组件
pub struct Harness {
    pub flows: MockDataFlowRepository,
    pub runs: MockDataFlowRunRepository,
    pub connectors: TestConnectors,
    pub service: Arc<DataFlowService>,
    pub executor: Arc<BatchExecutor>,
    pub heartbeat: HeartbeatScheduler,
}

impl Harness {
    pub fn new() -> Self {
        let (flows, runs) = mock_repositories();
        let connectors = TestConnectors::new();
        let metrics = Arc::new(MetricsCollector::new());

        let service = Arc::new(DataFlowService::new(
            Arc::new(flows.clone()),
            Arc::new(runs.clone()),
            metrics.clone(),
        ));
        let executor = Arc::new(BatchExecutor::new(
            Arc::new(connectors.registry()),
            service.clone(),
            metrics.clone(),
        ));
        let heartbeat = HeartbeatScheduler::new(service.clone(), executor.clone(), metrics);

        Self {
            flows,
            runs,
            connectors,
            service,
            executor,
            heartbeat,
        }
    }

    pub async fn register(
        &self,
        name: &str,
        source: Value,
        sink: Value,
        runtime: Option<Value>,
        now: DateTime<Utc>,
    ) -> DataFlow {
        self.service
            .register(name, Some(&source), Some(&sink), runtime.as_ref(), now)
            .await
            .unwrap()
    }

    pub fn flow(&self, id: i64) -> DataFlow {
        self.flows
            .get_all_flows()
            .into_iter()
            .find(|f| f.id == id)
            .unwrap()
    }

    pub fn runs_with(&self, data_flow_id: i64, status: DataFlowRunStatus) -> Vec<DataFlowRun> {
        self.runs.runs_for(data_flow_id, status)
    }

    pub fn in_progress_count(&self, data_flow_id: i64) -> usize {
        self.runs_with(data_flow_id, DataFlowRunStatus::InProgress).len()
    }
}
