use std::fmt;

use chrono::{DateTime, Duration, Utc};
use dataflow_errors::{DataFlowError, DataFlowResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_INTERVAL_SECONDS: u64 = 3600;
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// 调度间隔上限：一年
pub const MAX_INTERVAL_SECONDS: u64 = 366 * 24 * 3600;

/// 运行策略：调度间隔、单次批量上限与是否参与自动调度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePolicy {
    #[serde(rename = "interval")]
    pub interval_seconds: u64,
    pub batch_size: usize,
    pub enabled: bool,
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            batch_size: DEFAULT_BATCH_SIZE,
            enabled: false,
        }
    }
}

impl RuntimePolicy {
    pub fn new(interval_seconds: u64, batch_size: usize, enabled: bool) -> Self {
        Self {
            interval_seconds,
            batch_size,
            enabled,
        }
    }

    /// 从描述符选项宽松解析：缺失或类型不符的字段取默认值，
    /// 只有 `enabled` 显式为 `true` 时才参与自动调度
    pub fn from_options(options: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        Self {
            interval_seconds: options
                .get("interval")
                .and_then(Value::as_u64)
                .filter(|v| *v > 0)
                .unwrap_or(defaults.interval_seconds),
            batch_size: options
                .get("batch_size")
                .and_then(Value::as_u64)
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .unwrap_or(defaults.batch_size),
            enabled: options.get("enabled").and_then(Value::as_bool) == Some(true),
        }
    }

    pub fn to_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("interval".to_string(), Value::from(self.interval_seconds));
        options.insert("batch_size".to_string(), Value::from(self.batch_size as u64));
        options.insert("enabled".to_string(), Value::Bool(self.enabled));
        options
    }

    /// 超出上限的间隔按上限计算，未通过 `validate` 的策略也不会溢出
    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_seconds.min(MAX_INTERVAL_SECONDS) as i64)
    }

    /// `from + interval`，时间越界时返回配置错误
    pub fn next_after(&self, from: DateTime<Utc>) -> DataFlowResult<DateTime<Utc>> {
        from.checked_add_signed(self.interval()).ok_or_else(|| {
            DataFlowError::config_error(format!(
                "调度时间越界: {from} + {} 秒",
                self.interval_seconds
            ))
        })
    }

    pub fn validate(&self) -> DataFlowResult<()> {
        if self.interval_seconds == 0 {
            return Err(DataFlowError::validation_error("interval 必须大于0"));
        }
        if self.interval_seconds > MAX_INTERVAL_SECONDS {
            return Err(DataFlowError::validation_error(format!(
                "interval 不能超过 {MAX_INTERVAL_SECONDS} 秒"
            )));
        }
        if self.batch_size == 0 {
            return Err(DataFlowError::validation_error("batch_size 必须大于0"));
        }
        Ok(())
    }
}

/// 写入前的冲突预测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollisionOutcome {
    /// 目标中不存在，正常写入
    New,
    /// 目标中已存在相同数据，跳过
    Redundant,
    /// 目标中已存在，按键原地更新
    Update,
    NoPrediction,
}

impl CollisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionOutcome::New => "NEW",
            CollisionOutcome::Redundant => "REDUNDANT",
            CollisionOutcome::Update => "UPDATE",
            CollisionOutcome::NoPrediction => "NO_PREDICTION",
        }
    }
}

impl fmt::Display for CollisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
