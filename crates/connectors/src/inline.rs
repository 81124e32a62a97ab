use async_trait::async_trait;
use dataflow_domain::{is_after_cursor, Cursor, Descriptor, Record, RecordStream, Source};
use dataflow_errors::{DataFlowError, DataFlowResult};
use futures::{stream, StreamExt};
use serde_json::{Map, Value};

use crate::options::sort_by_id;

/// 记录直接内嵌在描述符 `records` 选项中的源，主要用于演示和测试
#[derive(Debug, Clone)]
pub struct InlineSource {
    records: Vec<Record>,
}

impl InlineSource {
    pub const TYPE_TAG: &'static str = "inline";

    pub fn new(mut records: Vec<Record>) -> Self {
        sort_by_id(&mut records, "id");
        Self { records }
    }

    pub fn from_descriptor(descriptor: &Descriptor) -> DataFlowResult<Self> {
        let records = match descriptor.option("records") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(DataFlowError::rehydration_error(
                    Self::TYPE_TAG,
                    format!("records 必须是数组: {other}"),
                ))
            }
        };
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl Source for InlineSource {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("records".to_string(), Value::Array(self.records.clone()));
        options
    }

    fn each<'a>(&'a self, batch_size: usize, start_cursor: Option<&'a Cursor>) -> RecordStream<'a> {
        let records = self
            .records
            .iter()
            .filter(move |record| is_after_cursor(record.get("id"), start_cursor))
            .take(batch_size)
            .cloned()
            .map(Ok);
        stream::iter(records).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_inline_source_orders_and_resumes() {
        let source = InlineSource::new(vec![json!({"id": 3}), json!({"id": 1}), json!({"id": 2})]);
        let all: Vec<_> = source.each(10, None).map(|r| r.unwrap()).collect().await;
        assert_eq!(all, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);

        let cursor = Cursor::from(1);
        let rest: Vec<_> = source.each(1, Some(&cursor)).map(|r| r.unwrap()).collect().await;
        assert_eq!(rest, vec![json!({"id": 2})]);
    }

    #[test]
    fn test_inline_source_rejects_non_array() {
        let descriptor = Descriptor::tag_only("inline").with_option("records", json!("nope"));
        assert!(matches!(
            InlineSource::from_descriptor(&descriptor).unwrap_err(),
            DataFlowError::Rehydration { .. }
        ));
    }
}
