//! 以换行分隔 JSON 文件作为源和汇

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dataflow_domain::{is_after_cursor, Cursor, Descriptor, Record, RecordStream, Sink, Source};
use dataflow_errors::{DataFlowError, DataFlowResult};
use futures::{stream, StreamExt};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::options::{required_str, sort_by_id, str_or};

const DEFAULT_ID_FIELD: &str = "id";

async fn read_records(path: &Path) -> DataFlowResult<Vec<Record>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(DataFlowError::execution_error(format!(
                "读取文件失败 {}: {e}",
                path.display()
            )))
        }
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                DataFlowError::execution_error(format!(
                    "{} 第{}行不是合法JSON: {e}",
                    path.display(),
                    index + 1
                ))
            })
        })
        .collect()
}

/// 每次迭代时重新读取文件，并按 `id_field` 排序后从游标之后开始产出
#[derive(Debug, Clone)]
pub struct JsonlFileSource {
    path: PathBuf,
    id_field: String,
}

impl JsonlFileSource {
    pub const TYPE_TAG: &'static str = "jsonl_file";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn from_descriptor(descriptor: &Descriptor) -> DataFlowResult<Self> {
        let path = required_str(descriptor, "path")?;
        Ok(Self::new(path).with_id_field(str_or(descriptor, "id_field", DEFAULT_ID_FIELD)))
    }

    async fn load_after(&self, batch_size: usize, start: Option<&Cursor>) -> DataFlowResult<Vec<Record>> {
        let mut records = read_records(&self.path).await?;
        sort_by_id(&mut records, &self.id_field);
        Ok(records
            .into_iter()
            .filter(|record| is_after_cursor(record.get(&self.id_field), start))
            .take(batch_size)
            .collect())
    }
}

#[async_trait]
impl Source for JsonlFileSource {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("path".to_string(), Value::String(self.path.display().to_string()));
        options.insert("id_field".to_string(), Value::String(self.id_field.clone()));
        options
    }

    fn each<'a>(&'a self, batch_size: usize, start_cursor: Option<&'a Cursor>) -> RecordStream<'a> {
        stream::once(self.load_after(batch_size, start_cursor))
            .flat_map(|loaded| match loaded {
                Ok(records) => stream::iter(records.into_iter().map(Ok)).boxed(),
                Err(e) => stream::iter(vec![Err(e)]).boxed(),
            })
            .boxed()
    }

    fn record_id(&self, record: &Record) -> Option<Cursor> {
        record
            .get(&self.id_field)
            .filter(|id| !id.is_null())
            .cloned()
            .map(Cursor::new)
    }
}

/// 追加写入换行分隔 JSON 文件，支持按 `key_field` 原地覆盖
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    key_field: String,
    lock: Mutex<()>,
}

impl JsonlFileSink {
    pub const TYPE_TAG: &'static str = "jsonl_file";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key_field: DEFAULT_ID_FIELD.to_string(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }

    pub fn from_descriptor(descriptor: &Descriptor) -> DataFlowResult<Self> {
        let path = required_str(descriptor, "path")?;
        Ok(Self::new(path).with_key_field(str_or(descriptor, "key_field", DEFAULT_ID_FIELD)))
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> DataFlowError {
        DataFlowError::execution_error(format!("{action}失败 {}: {e}", self.path.display()))
    }

    async fn append_lines(&self, records: &[Record]) -> DataFlowResult<()> {
        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error("打开文件", e))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| self.io_error("写入文件", e))?;
        file.flush().await.map_err(|e| self.io_error("刷新文件", e))
    }
}

#[async_trait]
impl Sink for JsonlFileSink {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("path".to_string(), Value::String(self.path.display().to_string()));
        options.insert("key_field".to_string(), Value::String(self.key_field.clone()));
        options
    }

    async fn write(&self, record: Record) -> DataFlowResult<()> {
        self.append_lines(std::slice::from_ref(&record)).await
    }

    async fn write_batch(&self, records: Vec<Record>) -> DataFlowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.append_lines(&records).await
    }

    async fn update(&self, key: &Value, record: Record) -> DataFlowResult<bool> {
        let _guard = self.lock.lock().await;
        let mut records = read_records(&self.path).await?;

        let Some(position) = records
            .iter()
            .position(|existing| existing.get(&self.key_field) == Some(key))
        else {
            warn!("未找到需要更新的记录: {}={}", self.key_field, key);
            return Ok(false);
        };
        records[position] = record;

        let mut content = String::new();
        for record in &records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| self.io_error("重写文件", e))?;
        debug!("已原地更新记录: {}={}", self.key_field, key);
        Ok(true)
    }
}
