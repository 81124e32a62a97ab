mod common;

use chrono::Utc;
use serde_json::{json, Value};

use common::Harness;
use dataflow_domain::{CollisionOutcome, Cursor, DataFlow, DataFlowRun};
use dataflow_errors::DataFlowError;
use dataflow_testing_utils::{
    numbered_records, DataFlowBuilder, DataFlowRunBuilder, ScriptedRuntime, TestConnectors,
    VecSource,
};

/// 直接插入数据流和一个运行中的实例，绕过注册与排期
fn seed(h: &Harness, flow: DataFlow, run_id: i64) -> (DataFlow, DataFlowRun) {
    h.flows.insert(flow.clone());
    let run = DataFlowRunBuilder::new()
        .with_id(run_id)
        .with_data_flow_id(flow.id)
        .in_progress(Utc::now())
        .build();
    h.runs.insert(run.clone());
    (flow, run)
}

fn flow_with(source: Value, runtime: Value) -> DataFlow {
    DataFlowBuilder::new()
        .with_id(1)
        .with_name("executor")
        .with_source(source)
        .with_sink(TestConnectors::collecting_sink())
        .with_runtime(runtime)
        .build()
}

#[tokio::test]
async fn test_batch_size_bounds_each_execution() {
    let h = Harness::new();
    let source = VecSource::descriptor_for(&numbered_records(10), None);
    let (flow, run) = seed(&h, flow_with(source, ScriptedRuntime::descriptor_for(3, &[])), 1);

    let outcome = h.executor.execute(&flow, &run).await.unwrap();
    assert_eq!(outcome.processed, 3);
    assert_eq!(outcome.written, 3);
    assert_eq!(outcome.first_id, Some(Cursor::from(1)));
    assert_eq!(outcome.last_id, Some(Cursor::from(3)));
    assert_eq!(h.flow(flow.id).next_source_id, Some(Cursor::from(3)));

    let resumed = h.flow(flow.id);
    let (_, second_run) = seed(&h, resumed.clone(), 2);
    let outcome = h.executor.execute(&resumed, &second_run).await.unwrap();
    assert_eq!(outcome.first_id, Some(Cursor::from(4)));
    assert_eq!(outcome.last_id, Some(Cursor::from(6)));
    assert_eq!(
        h.connectors.probe.written_ids(),
        (1..=6).map(|id| json!(id)).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_collision_outcomes_route_records() {
    let h = Harness::new();
    let source = VecSource::descriptor_for(&numbered_records(4), None);
    let (flow, run) = seed(&h, flow_with(source, ScriptedRuntime::descriptor_for(10, &[])), 1);
    h.executor.execute(&flow, &run).await.unwrap();
    assert_eq!(h.connectors.probe.written().len(), 4);

    // 源重放同一批记录外加一条新记录
    let records: Vec<Value> = numbered_records(5)
        .into_iter()
        .map(|mut r| {
            r["value"] = json!(format!("changed-{}", r["id"]));
            r
        })
        .collect();
    let script = [
        (1, CollisionOutcome::Redundant),
        (2, CollisionOutcome::Update),
        (3, CollisionOutcome::NoPrediction),
    ];
    let replay = flow_with(
        VecSource::descriptor_for(&records, None),
        ScriptedRuntime::descriptor_for(10, &script),
    );
    let (replay, replay_run) = seed(&h, replay, 2);

    let outcome = h.executor.execute(&replay, &replay_run).await.unwrap();
    assert_eq!(outcome.processed, 5);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.written, 3);

    let updates = h.connectors.probe.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, json!(2));

    let written = h.connectors.probe.written();
    let record_2 = written.iter().find(|r| r["id"] == json!(2)).unwrap();
    assert_eq!(record_2["value"], json!("changed-2"));
    let record_1 = written.iter().find(|r| r["id"] == json!(1)).unwrap();
    assert_eq!(record_1["value"], json!("record-1"));
    assert_eq!(written.len(), 4 + 3);
}

#[tokio::test]
async fn test_redundant_records_count_toward_batch() {
    let h = Harness::new();
    let script = [
        (1, CollisionOutcome::Redundant),
        (2, CollisionOutcome::Redundant),
    ];
    let (flow, run) = seed(
        &h,
        flow_with(
            VecSource::descriptor_for(&numbered_records(5), None),
            ScriptedRuntime::descriptor_for(2, &script),
        ),
        1,
    );

    let outcome = h.executor.execute(&flow, &run).await.unwrap();
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.written, 0);
    // 被跳过的记录同样推进游标
    assert_eq!(h.flow(flow.id).next_source_id, Some(Cursor::from(2)));
}

#[tokio::test]
async fn test_update_without_existing_target_writes() {
    let h = Harness::new();
    let (flow, run) = seed(
        &h,
        flow_with(
            VecSource::descriptor_for(&numbered_records(1), None),
            ScriptedRuntime::descriptor_for(5, &[(1, CollisionOutcome::Update)]),
        ),
        1,
    );

    let outcome = h.executor.execute(&flow, &run).await.unwrap();
    assert_eq!(outcome.updated, 0);
    assert_eq!(outcome.written, 1);
    assert_eq!(h.connectors.probe.updates().len(), 1);
    assert_eq!(h.connectors.probe.written_ids(), vec![json!(1)]);
}

#[tokio::test]
async fn test_unknown_runtime_falls_back_to_default() {
    let h = Harness::new();
    let runtime = json!({"type_tag": "retired_runtime", "batch_size": 2, "interval": 60, "enabled": true});
    let (flow, run) = seed(
        &h,
        flow_with(VecSource::descriptor_for(&numbered_records(5), None), runtime),
        1,
    );

    let outcome = h.executor.execute(&flow, &run).await.unwrap();
    assert_eq!(outcome.processed, 2);
    assert_eq!(h.connectors.probe.written_ids(), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_missing_runtime_uses_default_policy() {
    let h = Harness::new();
    let flow = DataFlowBuilder::new()
        .with_source(VecSource::descriptor_for(&numbered_records(5), None))
        .with_sink(TestConnectors::collecting_sink())
        .build();
    assert!(flow.runtime.is_none());
    let (flow, run) = seed(&h, flow, 1);

    let outcome = h.executor.execute(&flow, &run).await.unwrap();
    assert_eq!(outcome.processed, 5);
    assert_eq!(outcome.written, 5);
}

#[tokio::test]
async fn test_runtime_transform_is_applied_before_write() {
    let h = Harness::new();
    let runtime = json!({
        "type_tag": "field_map",
        "interval": 60,
        "batch_size": 10,
        "enabled": true,
        "mapping": {"value": "label"},
    });
    let (flow, run) = seed(
        &h,
        flow_with(VecSource::descriptor_for(&numbered_records(2), None), runtime),
        1,
    );

    h.executor.execute(&flow, &run).await.unwrap();
    let written = h.connectors.probe.written();
    assert_eq!(written[0]["label"], json!("record-1"));
}

#[tokio::test]
async fn test_unknown_source_is_rehydration_error() {
    let h = Harness::new();
    let (flow, run) = seed(
        &h,
        flow_with(
            json!({"type_tag": "no_such_source"}),
            ScriptedRuntime::descriptor_for(5, &[]),
        ),
        1,
    );

    let err = h.executor.execute(&flow, &run).await.unwrap_err();
    assert!(matches!(err, DataFlowError::Rehydration { .. }));
    assert_eq!(h.flow(flow.id).next_source_id, None);
}
