use dataflow_connectors::{
    ConnectorRegistry, DefaultRuntime, FieldMapRuntime, InlineSource, JsonlFileSink,
    JsonlFileSource, LogSink,
};
use dataflow_domain::{Cursor, Descriptor, Record, Runtime, RuntimePolicy, Sink, Source};
use dataflow_errors::DataFlowError;
use futures::StreamExt;
use serde_json::json;

async fn drain(source: &dyn Source, batch_size: usize, cursor: Option<&Cursor>) -> Vec<Record> {
    source
        .each(batch_size, cursor)
        .map(|record| record.expect("record"))
        .collect()
        .await
}

/// 反序列化(序列化(x)) 必须与 x 表现一致
#[tokio::test]
async fn test_sources_round_trip() {
    let registry = ConnectorRegistry::with_builtins();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.jsonl");
    std::fs::write(&path, "{\"id\": 2}\n{\"id\": 1}\n\n{\"id\": 3}\n").unwrap();

    let originals: Vec<Box<dyn Source>> = vec![
        Box::new(InlineSource::new(vec![json!({"id": 2}), json!({"id": 1}), json!({"id": 3})])),
        Box::new(JsonlFileSource::new(&path)),
    ];

    for original in originals {
        let descriptor = registry.serialize_source(original.as_ref());
        let stored = serde_json::to_string(&descriptor).unwrap();
        let restored = registry
            .deserialize_source(&registry.parse_descriptor(&stored).unwrap())
            .unwrap();

        let cursor = Cursor::from(1);
        assert_eq!(drain(original.as_ref(), 5, None).await, drain(restored.as_ref(), 5, None).await);
        assert_eq!(
            drain(original.as_ref(), 1, Some(&cursor)).await,
            drain(restored.as_ref(), 1, Some(&cursor)).await
        );
        assert_eq!(drain(restored.as_ref(), 1, Some(&cursor)).await, vec![json!({"id": 2})]);
    }
}

#[tokio::test]
async fn test_sinks_round_trip() {
    let registry = ConnectorRegistry::with_builtins();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.jsonl");

    let original = JsonlFileSink::new(&path).with_key_field("sku");
    let restored = registry
        .deserialize_sink(&registry.serialize_sink(&original))
        .unwrap();
    assert_eq!(restored.descriptor(), original.descriptor());

    restored.write(json!({"sku": "a"})).await.unwrap();
    original.write(json!({"sku": "b"})).await.unwrap();
    assert!(restored.update(&json!("a"), json!({"sku": "a", "v": 2})).await.unwrap());
    restored.close().await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content, "{\"sku\":\"a\",\"v\":2}\n{\"sku\":\"b\"}\n");

    let log = LogSink::new("audit");
    let restored_log = registry.deserialize_sink(&registry.serialize_sink(&log)).unwrap();
    assert_eq!(restored_log.descriptor(), log.descriptor());
    restored_log.write(json!({"id": 1})).await.unwrap();
}

#[test]
fn test_runtimes_round_trip() {
    let registry = ConnectorRegistry::with_builtins();
    let policy = RuntimePolicy::new(90, 7, true);
    let record = json!({"id": 4, "email": "a@b.c", "pw": "x"});

    let originals: Vec<Box<dyn Runtime>> = vec![
        Box::new(DefaultRuntime::new(policy)),
        Box::new(FieldMapRuntime::new(policy, vec![("id".into(), "id".into()), ("email".into(), "mail".into())])),
    ];

    for original in originals {
        let restored = registry
            .deserialize_runtime(&registry.serialize_runtime(original.as_ref()))
            .unwrap();
        assert_eq!(restored.policy(), original.policy());
        assert_eq!(
            restored.transform(record.clone()).unwrap(),
            original.transform(record.clone()).unwrap()
        );
    }
}

#[test]
fn test_unknown_tag_is_rehydration_error() {
    let registry = ConnectorRegistry::with_builtins();
    let descriptor = Descriptor::tag_only("kafka");

    let err = registry.deserialize_source(&descriptor).err().unwrap();
    assert!(matches!(err, DataFlowError::Rehydration { ref type_tag, .. } if type_tag == "kafka"));
    assert!(registry.deserialize_sink(&descriptor).is_err());
    assert!(registry.deserialize_runtime(&descriptor).is_err());
    assert!(matches!(
        registry.parse_descriptor("[1,2]").unwrap_err(),
        DataFlowError::Rehydration { .. }
    ));
}

#[test]
fn test_builtin_tags() {
    let registry = ConnectorRegistry::with_builtins();
    assert_eq!(registry.source_tags(), vec!["inline", "jsonl_file"]);
    assert_eq!(registry.sink_tags(), vec!["jsonl_file", "log"]);
    assert_eq!(registry.runtime_tags(), vec!["default", "field_map"]);
    assert!(!ConnectorRegistry::new().has_source("inline"));
}
