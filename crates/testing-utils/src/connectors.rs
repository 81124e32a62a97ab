//! Test connectors
//!
//! Each connector is registered under its own tag so the executor can rehydrate
//! it from a descriptor like any production connector. Side effects are
//! collected on a shared [`ConnectorProbe`] for assertions.

use async_trait::async_trait;
use dataflow_connectors::ConnectorRegistry;
use dataflow_domain::{
    is_after_cursor, order_ids, CollisionOutcome, Cursor, Descriptor, Record, RecordStream, Runtime,
    RuntimePolicy, Sink, Source,
};
use dataflow_errors::{DataFlowError, DataFlowResult};
use futures::{stream, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

/// Shared record of what the test connectors observed
#[derive(Debug, Default)]
pub struct ConnectorProbe {
    written: Mutex<Vec<Record>>,
    updates: Mutex<Vec<(Value, Record)>>,
    source_closed: AtomicUsize,
    sink_closed: AtomicUsize,
}

impl ConnectorProbe {
    pub fn written(&self) -> Vec<Record> {
        self.written.lock().unwrap().clone()
    }

    pub fn written_ids(&self) -> Vec<Value> {
        self.written().iter().map(|r| r["id"].clone()).collect()
    }

    pub fn updates(&self) -> Vec<(Value, Record)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn source_closed(&self) -> usize {
        self.source_closed.load(AtomicOrdering::SeqCst)
    }

    pub fn sink_closed(&self) -> usize {
        self.sink_closed.load(AtomicOrdering::SeqCst)
    }

    pub fn clear(&self) {
        self.written.lock().unwrap().clear();
        self.updates.lock().unwrap().clear();
    }
}

/// Source over a fixed list of records, optionally failing part way through
pub struct VecSource {
    records: Vec<Record>,
    fail_after: Option<usize>,
    probe: Arc<ConnectorProbe>,
}

impl VecSource {
    pub const TYPE_TAG: &'static str = "vec";

    pub fn descriptor_for(records: &[Record], fail_after: Option<usize>) -> Value {
        let mut descriptor = json!({"type_tag": Self::TYPE_TAG, "records": records});
        if let Some(n) = fail_after {
            descriptor["fail_after"] = json!(n);
        }
        descriptor
    }

    fn from_descriptor(descriptor: &Descriptor, probe: Arc<ConnectorProbe>) -> DataFlowResult<Self> {
        let mut records = match descriptor.option("records") {
            Some(Value::Array(items)) => items.clone(),
            None => Vec::new(),
            Some(other) => {
                return Err(DataFlowError::execution_error(format!(
                    "records must be an array, got {other}"
                )))
            }
        };
        records.sort_by(|a, b| order_ids(a.get("id"), b.get("id")));
        Ok(Self {
            records,
            fail_after: descriptor
                .option("fail_after")
                .and_then(Value::as_u64)
                .map(|n| n as usize),
            probe,
        })
    }
}

#[async_trait]
impl Source for VecSource {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("records".to_string(), Value::Array(self.records.clone()));
        if let Some(n) = self.fail_after {
            options.insert("fail_after".to_string(), json!(n));
        }
        options
    }

    fn each<'a>(&'a self, _batch_size: usize, start_cursor: Option<&'a Cursor>) -> RecordStream<'a> {
        let mut items: Vec<DataFlowResult<Record>> = self
            .records
            .iter()
            .filter(|r| is_after_cursor(r.get("id"), start_cursor))
            .cloned()
            .map(Ok)
            .collect();

        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(DataFlowError::execution_error(format!(
                "source failed after {n} records"
            ))));
        }
        stream::iter(items).boxed()
    }

    async fn close(&self) -> DataFlowResult<()> {
        self.probe.source_closed.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}

/// Sink that keeps every record on the probe and supports keyed updates
pub struct CollectingSink {
    probe: Arc<ConnectorProbe>,
}

impl CollectingSink {
    pub const TYPE_TAG: &'static str = "collect";

    pub fn new(probe: Arc<ConnectorProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Sink for CollectingSink {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn options(&self) -> Map<String, Value> {
        Map::new()
    }

    async fn write(&self, record: Record) -> DataFlowResult<()> {
        self.probe.written.lock().unwrap().push(record);
        Ok(())
    }

    async fn update(&self, key: &Value, record: Record) -> DataFlowResult<bool> {
        self.probe
            .updates
            .lock()
            .unwrap()
            .push((key.clone(), record.clone()));

        let mut written = self.probe.written.lock().unwrap();
        match written.iter_mut().find(|r| r.get("id") == Some(key)) {
            Some(existing) => {
                *existing = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close(&self) -> DataFlowResult<()> {
        self.probe.sink_closed.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}

/// Sink that fails on the `fail_on`-th write (1-based)
pub struct FailingSink {
    fail_on: usize,
    writes: AtomicUsize,
    probe: Arc<ConnectorProbe>,
}

impl FailingSink {
    pub const TYPE_TAG: &'static str = "failing";

    pub fn descriptor_for(fail_on: usize) -> Value {
        json!({"type_tag": Self::TYPE_TAG, "fail_on": fail_on})
    }
}

#[async_trait]
impl Sink for FailingSink {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("fail_on".to_string(), json!(self.fail_on));
        options
    }

    async fn write(&self, record: Record) -> DataFlowResult<()> {
        let n = self.writes.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        if n >= self.fail_on {
            return Err(DataFlowError::execution_error(format!(
                "sink write failed on record {}",
                record["id"]
            )));
        }
        self.probe.written.lock().unwrap().push(record);
        Ok(())
    }

    async fn close(&self) -> DataFlowResult<()> {
        self.probe.sink_closed.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}

/// Runtime with a scripted collision answer per record id
///
/// `collisions` maps the record id (as text) to an outcome; ids not listed
/// answer `NEW`. Without a `collisions` option the hook is absent.
pub struct ScriptedRuntime {
    policy: RuntimePolicy,
    collisions: Option<HashMap<String, CollisionOutcome>>,
    stamp: Option<String>,
}

impl ScriptedRuntime {
    pub const TYPE_TAG: &'static str = "scripted";

    pub fn descriptor_for(batch_size: usize, collisions: &[(i64, CollisionOutcome)]) -> Value {
        let script: Map<String, Value> = collisions
            .iter()
            .map(|(id, outcome)| (id.to_string(), json!(outcome)))
            .collect();
        json!({
            "type_tag": Self::TYPE_TAG,
            "interval": 60,
            "batch_size": batch_size,
            "enabled": true,
            "collisions": script,
        })
    }

    fn from_descriptor(descriptor: &Descriptor) -> DataFlowResult<Self> {
        let collisions = match descriptor.option("collisions") {
            Some(value) => Some(serde_json::from_value(value.clone())?),
            None => None,
        };
        Ok(Self {
            policy: RuntimePolicy::from_options(&descriptor.options),
            collisions,
            stamp: descriptor
                .option("stamp")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn policy(&self) -> &RuntimePolicy {
        &self.policy
    }

    fn extra_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        if let Some(collisions) = &self.collisions {
            options.insert("collisions".to_string(), json!(collisions));
        }
        if let Some(stamp) = &self.stamp {
            options.insert("stamp".to_string(), json!(stamp));
        }
        options
    }

    fn transform(&self, mut record: Record) -> DataFlowResult<Record> {
        if let (Some(stamp), Some(fields)) = (&self.stamp, record.as_object_mut()) {
            fields.insert("stamp".to_string(), json!(stamp));
        }
        Ok(record)
    }

    async fn detect_collision(
        &self,
        source: &Record,
        _transformed: &Record,
    ) -> DataFlowResult<Option<CollisionOutcome>> {
        Ok(self.collisions.as_ref().map(|script| {
            let id = Cursor::new(source["id"].clone()).to_string();
            script.get(&id).copied().unwrap_or(CollisionOutcome::New)
        }))
    }
}

/// A registry with the built-ins plus the test connectors, sharing one probe
#[derive(Clone, Default)]
pub struct TestConnectors {
    pub probe: Arc<ConnectorProbe>,
}

impl TestConnectors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::with_builtins();

        let probe = self.probe.clone();
        registry.register_source(VecSource::TYPE_TAG, move |d| {
            Ok(Box::new(VecSource::from_descriptor(d, probe.clone())?) as Box<dyn Source>)
        });

        let probe = self.probe.clone();
        registry.register_sink(CollectingSink::TYPE_TAG, move |_| {
            Ok(Box::new(CollectingSink::new(probe.clone())) as Box<dyn Sink>)
        });

        let probe = self.probe.clone();
        registry.register_sink(FailingSink::TYPE_TAG, move |d| {
            let fail_on = d.option("fail_on").and_then(Value::as_u64).unwrap_or(1) as usize;
            Ok(Box::new(FailingSink {
                fail_on,
                writes: AtomicUsize::new(0),
                probe: probe.clone(),
            }) as Box<dyn Sink>)
        });

        registry.register_runtime(ScriptedRuntime::TYPE_TAG, |d| {
            Ok(Box::new(ScriptedRuntime::from_descriptor(d)?) as Box<dyn Runtime>)
        });
        registry
    }

    pub fn collecting_sink() -> Value {
        json!({"type_tag": CollectingSink::TYPE_TAG})
    }
}
