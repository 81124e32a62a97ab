//! 源、汇与运行时的抽象接口
//!
//! 具体实现由 `dataflow-connectors` 或宿主程序提供，并以描述符的形式
//! 持久化在数据流上。

use async_trait::async_trait;
use dataflow_errors::{DataFlowError, DataFlowResult};
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::descriptor::{Cursor, Descriptor, Record};
use crate::runtime_policy::{CollisionOutcome, RuntimePolicy};

pub type RecordStream<'a> = BoxStream<'a, DataFlowResult<Record>>;

/// 默认的记录标识：记录的 `id` 字段
pub fn default_record_id(record: &Record) -> Option<Cursor> {
    record
        .get("id")
        .filter(|id| !id.is_null())
        .cloned()
        .map(Cursor::new)
}

#[async_trait]
pub trait Source: Send + Sync {
    fn type_tag(&self) -> &str;

    fn options(&self) -> Map<String, Value>;

    fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.type_tag(), self.options())
    }

    /// 按稳定顺序产出 `start_cursor` 之后的记录。相同游标重复调用必须得到相同序列；
    /// `batch_size` 只是提示，调用方负责截断。
    fn each<'a>(&'a self, batch_size: usize, start_cursor: Option<&'a Cursor>) -> RecordStream<'a>;

    fn record_id(&self, record: &Record) -> Option<Cursor> {
        default_record_id(record)
    }

    async fn close(&self) -> DataFlowResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn type_tag(&self) -> &str;

    fn options(&self) -> Map<String, Value>;

    fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.type_tag(), self.options())
    }

    async fn write(&self, record: Record) -> DataFlowResult<()>;

    async fn write_batch(&self, records: Vec<Record>) -> DataFlowResult<()> {
        for record in records {
            self.write(record).await?;
        }
        Ok(())
    }

    /// 按键原地覆盖已有记录，返回是否找到了目标
    async fn update(&self, key: &Value, _record: Record) -> DataFlowResult<bool> {
        Err(DataFlowError::execution_error(format!(
            "汇 {} 不支持原地更新 (键: {key})",
            self.type_tag()
        )))
    }

    async fn flush(&self) -> DataFlowResult<()> {
        Ok(())
    }

    async fn close(&self) -> DataFlowResult<()> {
        self.flush().await
    }
}

#[async_trait]
pub trait Runtime: Send + Sync {
    fn type_tag(&self) -> &str;

    fn policy(&self) -> &RuntimePolicy;

    /// 除策略字段外的实现自身选项
    fn extra_options(&self) -> Map<String, Value> {
        Map::new()
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = self.policy().to_options();
        options.extend(self.extra_options());
        options
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.type_tag(), self.options())
    }

    fn transform(&self, record: Record) -> DataFlowResult<Record> {
        Ok(record)
    }

    /// 冲突检测钩子，返回 `None` 表示未提供
    async fn detect_collision(
        &self,
        _source: &Record,
        _transformed: &Record,
    ) -> DataFlowResult<Option<CollisionOutcome>> {
        Ok(None)
    }

    /// 用于 `Update` 时定位目标记录的键
    fn collision_key(&self, transformed: &Record) -> Option<Value> {
        transformed.get("id").filter(|id| !id.is_null()).cloned()
    }
}
