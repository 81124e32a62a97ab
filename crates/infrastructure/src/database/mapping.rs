//! 行映射共用的转换函数

use chrono::{DateTime, Utc};
use dataflow_domain::Cursor;
use dataflow_errors::{DataFlowError, DataFlowResult};
use serde_json::Value;

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DataFlowResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DataFlowError::database_error(format!("时间戳超出范围: {millis}")))
}

pub(crate) fn opt_from_millis(millis: Option<i64>) -> DataFlowResult<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

/// 描述符原样加载；不是合法 JSON 时保留为字符串，留给重建阶段报错
pub(crate) fn descriptor_from_text(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub(crate) fn cursor_from_text(raw: Option<String>) -> Option<Cursor> {
    raw.as_deref().map(Cursor::from_storage)
}
