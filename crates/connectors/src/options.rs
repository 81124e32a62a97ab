use dataflow_domain::{order_ids, Descriptor};
use dataflow_errors::{DataFlowError, DataFlowResult};
use serde_json::Value;

pub(crate) fn required_str<'a>(descriptor: &'a Descriptor, key: &str) -> DataFlowResult<&'a str> {
    descriptor
        .option(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            DataFlowError::rehydration_error(
                descriptor.type_tag.as_str(),
                format!("缺少必需的字符串选项 '{key}'"),
            )
        })
}

pub(crate) fn str_or<'a>(descriptor: &'a Descriptor, key: &str, default: &'a str) -> &'a str {
    descriptor
        .option(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
}

/// 按 id 稳定排序：数值在前，字符串其次，缺少可比较 id 的记录排在最后
pub(crate) fn sort_by_id(records: &mut [Value], id_field: &str) {
    records.sort_by(|a, b| order_ids(a.get(id_field), b.get(id_field)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_by_id() {
        let mut records = vec![json!({"id": 10}), json!({"x": 1}), json!({"id": 2})];
        sort_by_id(&mut records, "id");
        assert_eq!(records, vec![json!({"id": 2}), json!({"id": 10}), json!({"x": 1})]);
    }

    #[test]
    fn test_sort_by_id_with_mixed_id_types() {
        let mut records: Vec<Value> = (0..50)
            .map(|i| {
                if i % 2 == 0 {
                    json!({"id": format!("k{i:02}")})
                } else {
                    json!({"id": i})
                }
            })
            .collect();
        records.push(json!({"name": "no id"}));
        sort_by_id(&mut records, "id");

        assert_eq!(records.len(), 51);
        assert!(records[..25].iter().all(|r| r["id"].is_number()));
        assert!(records[25..50].iter().all(|r| r["id"].is_string()));
        assert_eq!(records[0]["id"], json!(1));
        assert_eq!(records[24]["id"], json!(49));
        assert_eq!(records[25]["id"], json!("k00"));
        assert_eq!(records[50], json!({"name": "no id"}));
    }
}
