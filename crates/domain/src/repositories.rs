//! 领域仓储抽象
//!
//! 调度核心只依赖这里定义的接口，SQLite 与 PostgreSQL 各自独立实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dataflow_errors::DataFlowResult;
use serde_json::Value;

use crate::descriptor::Cursor;
use crate::entities::{DataFlow, DataFlowRun, DataFlowRunStatus, RunStatusUpdate};

/// 数据流仓储抽象
#[async_trait]
pub trait DataFlowRepository: Send + Sync {
    /// 按名称插入或更新描述符，返回持久化后的数据流以及是否为新建
    async fn upsert_by_name(
        &self,
        name: &str,
        source: &Value,
        sink: &Value,
        runtime: Option<&Value>,
    ) -> DataFlowResult<(DataFlow, bool)>;
    async fn get_by_id(&self, id: i64) -> DataFlowResult<Option<DataFlow>>;
    async fn get_by_name(&self, name: &str) -> DataFlowResult<Option<DataFlow>>;
    async fn list(&self) -> DataFlowResult<Vec<DataFlow>>;
    /// 更新描述符与状态，不触碰游标和运行记录字段
    async fn update(&self, data_flow: &DataFlow) -> DataFlowResult<DataFlow>;
    async fn update_cursor(&self, id: i64, cursor: &Cursor) -> DataFlowResult<()>;
    /// 记录开始运行：写入 `last_run_at` 并清空 `last_error`
    async fn record_run_started(&self, id: i64, at: DateTime<Utc>) -> DataFlowResult<()>;
    async fn record_error(&self, id: i64, message: &str) -> DataFlowResult<()>;
    /// 删除数据流并级联删除其运行实例
    async fn delete(&self, id: i64) -> DataFlowResult<bool>;
    /// 活跃且存在已到期待运行实例的数据流
    async fn find_due(&self, now: DateTime<Utc>) -> DataFlowResult<Vec<DataFlow>>;
}

/// 数据流运行实例仓储抽象
#[async_trait]
pub trait DataFlowRunRepository: Send + Sync {
    async fn create(&self, data_flow_id: i64, run_after: DateTime<Utc>) -> DataFlowResult<DataFlowRun>;
    async fn get_by_id(&self, id: i64) -> DataFlowResult<Option<DataFlowRun>>;
    /// 按 `run_after` 倒序
    async fn find_by_data_flow(&self, data_flow_id: i64) -> DataFlowResult<Vec<DataFlowRun>>;
    async fn find_earliest_pending(
        &self,
        data_flow_id: i64,
        now: DateTime<Utc>,
    ) -> DataFlowResult<Option<DataFlowRun>>;
    /// 原子地将 pending 实例转为 in_progress，实例已不是 pending 或
    /// 该数据流已有运行中的实例时返回 `false`
    async fn claim(&self, run_id: i64, started_at: DateTime<Utc>) -> DataFlowResult<bool>;
    async fn update_status(
        &self,
        run_id: i64,
        status: DataFlowRunStatus,
        update: RunStatusUpdate,
    ) -> DataFlowResult<DataFlowRun>;
    async fn update_cursors(&self, run_id: i64, first_id: &Cursor, last_id: &Cursor) -> DataFlowResult<()>;
    async fn cancel_pending(&self, data_flow_id: i64) -> DataFlowResult<u64>;
    async fn find_overdue_pending(&self, before: DateTime<Utc>) -> DataFlowResult<Vec<DataFlowRun>>;
    async fn cancel_runs(&self, run_ids: &[i64]) -> DataFlowResult<u64>;
    async fn has_future_pending(&self, data_flow_id: i64, now: DateTime<Utc>) -> DataFlowResult<bool>;
    async fn find_in_progress(&self) -> DataFlowResult<Vec<DataFlowRun>>;
    /// 删除在 `cutoff` 之前结束的终态实例
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> DataFlowResult<u64>;
}
