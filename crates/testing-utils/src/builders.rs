//! Test data builders for creating test entities

use chrono::{DateTime, Utc};
use dataflow_domain::{Cursor, DataFlow, DataFlowRun, DataFlowRunStatus, DataFlowStatus};
use serde_json::{json, Value};

/// Builder for creating test DataFlow entities
pub struct DataFlowBuilder {
    data_flow: DataFlow,
}

impl DataFlowBuilder {
    pub fn new() -> Self {
        let mut data_flow = DataFlow::new(
            "test_flow",
            json!({"type_tag": "inline", "records": []}),
            json!({"type_tag": "log"}),
            None,
        );
        data_flow.id = 1;
        Self { data_flow }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.data_flow.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.data_flow.name = name.to_string();
        self
    }

    pub fn with_source(mut self, source: Value) -> Self {
        self.data_flow.source = source;
        self
    }

    pub fn with_sink(mut self, sink: Value) -> Self {
        self.data_flow.sink = sink;
        self
    }

    pub fn with_runtime(mut self, runtime: Value) -> Self {
        self.data_flow.runtime = Some(runtime);
        self
    }

    /// `default` runtime with the given policy
    pub fn with_policy(self, interval_seconds: u64, batch_size: usize, enabled: bool) -> Self {
        self.with_runtime(json!({
            "type_tag": "default",
            "interval": interval_seconds,
            "batch_size": batch_size,
            "enabled": enabled,
        }))
    }

    pub fn with_status(mut self, status: DataFlowStatus) -> Self {
        self.data_flow.status = status;
        self
    }

    pub fn inactive(self) -> Self {
        self.with_status(DataFlowStatus::Inactive)
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.data_flow.next_source_id = Some(cursor);
        self
    }

    pub fn build(self) -> DataFlow {
        self.data_flow
    }
}

impl Default for DataFlowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test DataFlowRun entities
pub struct DataFlowRunBuilder {
    run: DataFlowRun,
}

impl DataFlowRunBuilder {
    pub fn new() -> Self {
        let mut run = DataFlowRun::new(1, Utc::now());
        run.id = 1;
        Self { run }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.run.id = id;
        self
    }

    pub fn with_data_flow_id(mut self, data_flow_id: i64) -> Self {
        self.run.data_flow_id = data_flow_id;
        self
    }

    pub fn with_run_after(mut self, run_after: DateTime<Utc>) -> Self {
        self.run.run_after = run_after;
        self
    }

    pub fn with_status(mut self, status: DataFlowRunStatus) -> Self {
        self.run.status = status;
        self
    }

    pub fn in_progress(mut self, started_at: DateTime<Utc>) -> Self {
        self.run.status = DataFlowRunStatus::InProgress;
        self.run.started_at = Some(started_at);
        self
    }

    pub fn finished(mut self, status: DataFlowRunStatus, ended_at: DateTime<Utc>) -> Self {
        self.run.status = status;
        self.run.ended_at = Some(ended_at);
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.run.error_message = Some(message.to_string());
        self
    }

    pub fn build(self) -> DataFlowRun {
        self.run
    }
}

impl Default for DataFlowRunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` records `{"id": 1..=count, "value": "record-N"}`
pub fn numbered_records(count: i64) -> Vec<Value> {
    (1..=count)
        .map(|id| json!({"id": id, "value": format!("record-{id}")}))
        .collect()
}
