use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dataflow_domain::{Descriptor, Runtime, Sink, Source};
use dataflow_errors::{DataFlowError, DataFlowResult};
use tracing::debug;

use crate::inline::InlineSource;
use crate::jsonl::{JsonlFileSink, JsonlFileSource};
use crate::log_sink::LogSink;
use crate::runtimes::{DefaultRuntime, FieldMapRuntime};

pub type SourceFactory = Arc<dyn Fn(&Descriptor) -> DataFlowResult<Box<dyn Source>> + Send + Sync>;
pub type SinkFactory = Arc<dyn Fn(&Descriptor) -> DataFlowResult<Box<dyn Sink>> + Send + Sync>;
pub type RuntimeFactory = Arc<dyn Fn(&Descriptor) -> DataFlowResult<Box<dyn Runtime>> + Send + Sync>;

/// 类型标签到构造函数的显式映射
///
/// 由宿主程序在启动时构建并注入调度器，不存在进程级的全局注册表。
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    sources: HashMap<String, SourceFactory>,
    sinks: HashMap<String, SinkFactory>,
    runtimes: HashMap<String, RuntimeFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置连接器与运行时
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_source(InlineSource::TYPE_TAG, |d| {
            Ok(Box::new(InlineSource::from_descriptor(d)?) as Box<dyn Source>)
        });
        registry.register_source(JsonlFileSource::TYPE_TAG, |d| {
            Ok(Box::new(JsonlFileSource::from_descriptor(d)?) as Box<dyn Source>)
        });
        registry.register_sink(JsonlFileSink::TYPE_TAG, |d| {
            Ok(Box::new(JsonlFileSink::from_descriptor(d)?) as Box<dyn Sink>)
        });
        registry.register_sink(LogSink::TYPE_TAG, |d| {
            Ok(Box::new(LogSink::from_descriptor(d)?) as Box<dyn Sink>)
        });
        registry.register_runtime(DefaultRuntime::TYPE_TAG, |d| {
            Ok(Box::new(DefaultRuntime::from_descriptor(d)) as Box<dyn Runtime>)
        });
        registry.register_runtime(FieldMapRuntime::TYPE_TAG, |d| {
            Ok(Box::new(FieldMapRuntime::from_descriptor(d)?) as Box<dyn Runtime>)
        });
        registry
    }

    pub fn register_source<F>(&mut self, type_tag: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Descriptor) -> DataFlowResult<Box<dyn Source>> + Send + Sync + 'static,
    {
        let type_tag = type_tag.into();
        debug!("注册源连接器: {}", type_tag);
        self.sources.insert(type_tag, Arc::new(factory));
        self
    }

    pub fn register_sink<F>(&mut self, type_tag: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Descriptor) -> DataFlowResult<Box<dyn Sink>> + Send + Sync + 'static,
    {
        let type_tag = type_tag.into();
        debug!("注册汇连接器: {}", type_tag);
        self.sinks.insert(type_tag, Arc::new(factory));
        self
    }

    pub fn register_runtime<F>(&mut self, type_tag: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Descriptor) -> DataFlowResult<Box<dyn Runtime>> + Send + Sync + 'static,
    {
        let type_tag = type_tag.into();
        debug!("注册运行时: {}", type_tag);
        self.runtimes.insert(type_tag, Arc::new(factory));
        self
    }

    pub fn serialize_source(&self, source: &dyn Source) -> Descriptor {
        source.descriptor()
    }

    pub fn serialize_sink(&self, sink: &dyn Sink) -> Descriptor {
        sink.descriptor()
    }

    pub fn serialize_runtime(&self, runtime: &dyn Runtime) -> Descriptor {
        runtime.descriptor()
    }

    pub fn deserialize_source(&self, descriptor: &Descriptor) -> DataFlowResult<Box<dyn Source>> {
        let factory = self
            .sources
            .get(&descriptor.type_tag)
            .ok_or_else(|| unknown_tag("源", &descriptor.type_tag))?;
        factory(descriptor).map_err(|e| into_rehydration(&descriptor.type_tag, e))
    }

    pub fn deserialize_sink(&self, descriptor: &Descriptor) -> DataFlowResult<Box<dyn Sink>> {
        let factory = self
            .sinks
            .get(&descriptor.type_tag)
            .ok_or_else(|| unknown_tag("汇", &descriptor.type_tag))?;
        factory(descriptor).map_err(|e| into_rehydration(&descriptor.type_tag, e))
    }

    pub fn deserialize_runtime(&self, descriptor: &Descriptor) -> DataFlowResult<Box<dyn Runtime>> {
        let factory = self
            .runtimes
            .get(&descriptor.type_tag)
            .ok_or_else(|| unknown_tag("运行时", &descriptor.type_tag))?;
        factory(descriptor).map_err(|e| into_rehydration(&descriptor.type_tag, e))
    }

    pub fn parse_descriptor(&self, raw: &str) -> DataFlowResult<Descriptor> {
        Descriptor::parse(raw)
    }

    pub fn has_source(&self, type_tag: &str) -> bool {
        self.sources.contains_key(type_tag)
    }

    pub fn has_sink(&self, type_tag: &str) -> bool {
        self.sinks.contains_key(type_tag)
    }

    pub fn has_runtime(&self, type_tag: &str) -> bool {
        self.runtimes.contains_key(type_tag)
    }

    pub fn source_tags(&self) -> Vec<String> {
        sorted_keys(&self.sources)
    }

    pub fn sink_tags(&self) -> Vec<String> {
        sorted_keys(&self.sinks)
    }

    pub fn runtime_tags(&self) -> Vec<String> {
        sorted_keys(&self.runtimes)
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.source_tags())
            .field("sinks", &self.sink_tags())
            .field("runtimes", &self.runtime_tags())
            .finish()
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

fn unknown_tag(kind: &str, type_tag: &str) -> DataFlowError {
    DataFlowError::rehydration_error(type_tag, format!("未注册的{kind}类型"))
}

fn into_rehydration(type_tag: &str, error: DataFlowError) -> DataFlowError {
    match error {
        DataFlowError::Rehydration { .. } => error,
        other => DataFlowError::rehydration_error(type_tag, other.to_string()),
    }
}
