use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dataflow_domain::{Descriptor, Record, Sink};
use dataflow_errors::DataFlowResult;
use serde_json::{Map, Value};
use tracing::info;

use crate::options::str_or;

/// 把每条记录写入日志的汇
#[derive(Debug)]
pub struct LogSink {
    label: String,
    written: AtomicU64,
}

impl LogSink {
    pub const TYPE_TAG: &'static str = "log";

    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            written: AtomicU64::new(0),
        }
    }

    pub fn from_descriptor(descriptor: &Descriptor) -> DataFlowResult<Self> {
        Ok(Self::new(str_or(descriptor, "label", "dataflow")))
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for LogSink {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("label".to_string(), Value::String(self.label.clone()));
        options
    }

    async fn write(&self, record: Record) -> DataFlowResult<()> {
        let sequence = self.written.fetch_add(1, Ordering::Relaxed) + 1;
        info!(sink = %self.label, sequence, record = %record, "写入记录");
        Ok(())
    }

    async fn flush(&self) -> DataFlowResult<()> {
        info!(sink = %self.label, written = self.written(), "日志汇已刷新");
        Ok(())
    }
}
