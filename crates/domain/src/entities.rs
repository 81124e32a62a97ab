use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use dataflow_errors::{DataFlowError, DataFlowResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::{Cursor, Descriptor};
use crate::runtime_policy::RuntimePolicy;

/// 已注册的数据流
///
/// `source`/`sink`/`runtime` 保存原始描述符 JSON，只在执行前才重建为连接器，
/// 损坏的描述符因此不会影响数据流本身的加载。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlow {
    pub id: i64,
    pub name: String,
    pub source: Value,
    pub sink: Value,
    pub runtime: Option<Value>,
    pub status: DataFlowStatus,
    pub next_source_id: Option<Cursor>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataFlowStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
}

impl DataFlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFlowStatus::Active => "active",
            DataFlowStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for DataFlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFlowStatus {
    type Err = DataFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DataFlowStatus::Active),
            "inactive" => Ok(DataFlowStatus::Inactive),
            _ => Err(DataFlowError::validation_error(format!("无效的数据流状态: {s}"))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for DataFlowStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for DataFlowStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for DataFlowStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<DataFlowStatus>()
            .map_err(|_| format!("Invalid data flow status: {s}").into())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DataFlowStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<DataFlowStatus>()
            .map_err(|_| format!("Invalid data flow status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for DataFlowStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DataFlowStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl DataFlow {
    pub fn new(name: impl Into<String>, source: Value, sink: Value, runtime: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            source,
            sink,
            runtime,
            status: DataFlowStatus::Active,
            next_source_id: None,
            last_run_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DataFlowStatus::Active
    }

    /// 运行策略。运行时描述符缺失或损坏时退回默认策略（不参与自动调度）
    pub fn policy(&self) -> RuntimePolicy {
        self.runtime
            .as_ref()
            .and_then(|value| Descriptor::from_value(value).ok())
            .map(|descriptor| RuntimePolicy::from_options(&descriptor.options))
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.policy().enabled
    }

    /// 数据流处于活跃状态且策略允许自动调度
    pub fn is_schedulable(&self) -> bool {
        self.is_active() && self.is_enabled()
    }

    pub fn interval(&self) -> Duration {
        self.policy().interval()
    }

    pub fn batch_size(&self) -> usize {
        self.policy().batch_size
    }

    /// 下一次运行的时间点 `from + interval`
    pub fn next_run_after(&self, from: DateTime<Utc>) -> DataFlowResult<DateTime<Utc>> {
        self.policy().next_after(from)
    }

    /// 注册时初始运行的时间点：启用时立即运行，否则推迟一个间隔
    pub fn initial_run_after(&self, now: DateTime<Utc>) -> DataFlowResult<DateTime<Utc>> {
        if self.is_enabled() {
            Ok(now)
        } else {
            self.next_run_after(now)
        }
    }

    pub fn entity_description(&self) -> String {
        format!("数据流 '{}' (ID: {}, 状态: {})", self.name, self.id, self.status)
    }
}

/// 数据流的一次调度/执行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlowRun {
    pub id: i64,
    pub data_flow_id: i64,
    pub status: DataFlowRunStatus,
    pub run_after: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub first_id: Option<Cursor>,
    pub last_id: Option<Cursor>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataFlowRunStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl DataFlowRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFlowRunStatus::Pending => "pending",
            DataFlowRunStatus::InProgress => "in_progress",
            DataFlowRunStatus::Success => "success",
            DataFlowRunStatus::Failed => "failed",
            DataFlowRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DataFlowRunStatus::Success | DataFlowRunStatus::Failed | DataFlowRunStatus::Cancelled
        )
    }

    /// 进入该状态前必须处于的状态；`Pending` 只能通过创建得到
    pub fn allowed_predecessor(&self) -> Option<DataFlowRunStatus> {
        match self {
            DataFlowRunStatus::Pending => None,
            DataFlowRunStatus::InProgress | DataFlowRunStatus::Cancelled => {
                Some(DataFlowRunStatus::Pending)
            }
            DataFlowRunStatus::Success | DataFlowRunStatus::Failed => {
                Some(DataFlowRunStatus::InProgress)
            }
        }
    }

    pub fn can_transition_to(&self, next: DataFlowRunStatus) -> bool {
        next.allowed_predecessor() == Some(*self)
    }
}

impl fmt::Display for DataFlowRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFlowRunStatus {
    type Err = DataFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DataFlowRunStatus::Pending),
            "in_progress" => Ok(DataFlowRunStatus::InProgress),
            "success" => Ok(DataFlowRunStatus::Success),
            "failed" => Ok(DataFlowRunStatus::Failed),
            "cancelled" => Ok(DataFlowRunStatus::Cancelled),
            _ => Err(DataFlowError::validation_error(format!("无效的运行状态: {s}"))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for DataFlowRunStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for DataFlowRunStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for DataFlowRunStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<DataFlowRunStatus>()
            .map_err(|_| format!("Invalid data flow run status: {s}").into())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DataFlowRunStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<DataFlowRunStatus>()
            .map_err(|_| format!("Invalid data flow run status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for DataFlowRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DataFlowRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 状态转换时一并写入的字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatusUpdate {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RunStatusUpdate {
    pub fn ended(at: DateTime<Utc>) -> Self {
        Self {
            ended_at: Some(at),
            ..Default::default()
        }
    }

    pub fn failed(at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            ended_at: Some(at),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

impl DataFlowRun {
    pub fn new(data_flow_id: i64, run_after: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            data_flow_id,
            status: DataFlowRunStatus::Pending,
            run_after,
            started_at: None,
            ended_at: None,
            error_message: None,
            first_id: None,
            last_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DataFlowRunStatus::Pending
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == DataFlowRunStatus::InProgress
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.run_after <= now
    }

    /// 超过过期阈值仍未执行的待运行实例，只在启动清理时使用
    pub fn is_overdue(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.is_pending() && self.run_after <= now - staleness
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(started), Some(ended)) => Some(ended - started),
            _ => None,
        }
    }

    pub fn ensure_transition(&self, next: DataFlowRunStatus) -> DataFlowResult<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(DataFlowError::InvalidTransition {
                run_id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// 在内存中应用状态转换，非法转换返回错误且不修改实例
    pub fn apply(&mut self, next: DataFlowRunStatus, update: &RunStatusUpdate) -> DataFlowResult<()> {
        self.ensure_transition(next)?;
        self.status = next;
        if let Some(started_at) = update.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(ended_at) = update.ended_at {
            self.ended_at = Some(ended_at);
        }
        if let Some(message) = &update.error_message {
            self.error_message = Some(message.clone());
        }
        Ok(())
    }

    pub fn entity_description(&self) -> String {
        format!(
            "运行实例 (ID: {}, 数据流ID: {}, 状态: {})",
            self.id, self.data_flow_id, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow_with_runtime(runtime: Option<Value>) -> DataFlow {
        DataFlow::new(
            "orders",
            json!({"type_tag": "inline", "records": []}),
            json!({"type_tag": "log"}),
            runtime,
        )
    }

    #[test]
    fn test_flow_policy_from_runtime_descriptor() {
        let flow = flow_with_runtime(Some(
            json!({"type_tag": "default", "interval": 60, "batch_size": 5, "enabled": true}),
        ));
        assert!(flow.is_schedulable());
        assert_eq!(flow.interval(), Duration::seconds(60));
        assert_eq!(flow.batch_size(), 5);
    }

    #[test]
    fn test_flow_without_runtime_is_not_enabled() {
        let flow = flow_with_runtime(None);
        assert!(flow.is_active());
        assert!(!flow.is_enabled());
        assert_eq!(flow.interval(), Duration::seconds(3600));

        let corrupt = flow_with_runtime(Some(json!("garbage")));
        assert!(!corrupt.is_enabled());
    }

    #[test]
    fn test_initial_run_after() {
        let now = Utc::now();
        let enabled = flow_with_runtime(Some(
            json!({"type_tag": "default", "interval": 120, "enabled": true}),
        ));
        assert_eq!(enabled.initial_run_after(now).unwrap(), now);

        let disabled = flow_with_runtime(Some(json!({"type_tag": "default", "interval": 120})));
        assert_eq!(disabled.initial_run_after(now).unwrap(), now + Duration::seconds(120));
    }

    #[test]
    fn test_run_status_transitions() {
        use DataFlowRunStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Success));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Success));
        assert!(!InProgress.can_transition_to(Cancelled));
        for terminal in [Success, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, InProgress, Success, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_run_apply_rejects_illegal_transition() {
        let now = Utc::now();
        let mut run = DataFlowRun::new(1, now);
        let err = run
            .apply(DataFlowRunStatus::Success, &RunStatusUpdate::ended(now))
            .unwrap_err();
        assert!(matches!(err, DataFlowError::InvalidTransition { .. }));
        assert!(run.is_pending());

        run.apply(
            DataFlowRunStatus::InProgress,
            &RunStatusUpdate {
                started_at: Some(now),
                ..Default::default()
            },
        )
        .unwrap();
        run.apply(
            DataFlowRunStatus::Failed,
            &RunStatusUpdate::failed(now + Duration::seconds(7), "boom"),
        )
        .unwrap();
        assert_eq!(run.error_message.as_deref(), Some("boom"));
        assert_eq!(run.duration(), Some(Duration::seconds(7)));
    }

    #[test]
    fn test_due_and_overdue() {
        let now = Utc::now();
        let staleness = Duration::hours(1);

        let recent = DataFlowRun::new(1, now - Duration::minutes(10));
        assert!(recent.is_due(now));
        assert!(!recent.is_overdue(now, staleness));

        let stale = DataFlowRun::new(1, now - Duration::hours(2));
        assert!(stale.is_due(now));
        assert!(stale.is_overdue(now, staleness));

        let future = DataFlowRun::new(1, now + Duration::minutes(1));
        assert!(!future.is_due(now));

        let mut cancelled = DataFlowRun::new(1, now - Duration::hours(2));
        cancelled.status = DataFlowRunStatus::Cancelled;
        assert!(!cancelled.is_due(now));
        assert!(!cancelled.is_overdue(now, staleness));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            DataFlowRunStatus::Pending,
            DataFlowRunStatus::InProgress,
            DataFlowRunStatus::Success,
            DataFlowRunStatus::Failed,
            DataFlowRunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<DataFlowRunStatus>().unwrap(), status);
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.as_str()));
        }
        assert!("RUNNING".parse::<DataFlowRunStatus>().is_err());
        assert_eq!("inactive".parse::<DataFlowStatus>().unwrap(), DataFlowStatus::Inactive);
    }
}
