use async_trait::async_trait;
use dataflow_domain::{Descriptor, Record, Runtime, RuntimePolicy};
use dataflow_errors::{DataFlowError, DataFlowResult};
use serde_json::{Map, Value};

const POLICY_KEYS: [&str; 3] = ["interval", "batch_size", "enabled"];

fn non_policy_options(options: &Map<String, Value>) -> Map<String, Value> {
    options
        .iter()
        .filter(|(key, _)| !POLICY_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// 恒等转换的运行时，也是运行时描述符缺失或损坏时的退路
#[derive(Debug, Clone, Default)]
pub struct DefaultRuntime {
    policy: RuntimePolicy,
    extra: Map<String, Value>,
}

impl DefaultRuntime {
    pub const TYPE_TAG: &'static str = "default";

    pub fn new(policy: RuntimePolicy) -> Self {
        Self {
            policy,
            extra: Map::new(),
        }
    }

    pub fn from_descriptor(descriptor: &Descriptor) -> Self {
        Self {
            policy: RuntimePolicy::from_options(&descriptor.options),
            extra: non_policy_options(&descriptor.options),
        }
    }
}

#[async_trait]
impl Runtime for DefaultRuntime {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn policy(&self) -> &RuntimePolicy {
        &self.policy
    }

    fn extra_options(&self) -> Map<String, Value> {
        self.extra.clone()
    }
}

/// 只保留 `mapping` 中列出的字段，并按 `{"原字段": "新字段"}` 重命名
#[derive(Debug, Clone)]
pub struct FieldMapRuntime {
    policy: RuntimePolicy,
    mapping: Vec<(String, String)>,
}

impl FieldMapRuntime {
    pub const TYPE_TAG: &'static str = "field_map";

    pub fn new(policy: RuntimePolicy, mapping: Vec<(String, String)>) -> Self {
        Self { policy, mapping }
    }

    pub fn from_descriptor(descriptor: &Descriptor) -> DataFlowResult<Self> {
        let object = descriptor
            .option("mapping")
            .and_then(Value::as_object)
            .ok_or_else(|| DataFlowError::rehydration_error(Self::TYPE_TAG, "缺少 mapping 对象"))?;

        let mapping = object
            .iter()
            .map(|(from, to)| {
                to.as_str()
                    .map(|to| (from.clone(), to.to_string()))
                    .ok_or_else(|| {
                        DataFlowError::rehydration_error(
                            Self::TYPE_TAG,
                            format!("字段 '{from}' 的目标名必须是字符串"),
                        )
                    })
            })
            .collect::<DataFlowResult<Vec<_>>>()?;

        Ok(Self::new(RuntimePolicy::from_options(&descriptor.options), mapping))
    }
}

#[async_trait]
impl Runtime for FieldMapRuntime {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn policy(&self) -> &RuntimePolicy {
        &self.policy
    }

    fn extra_options(&self) -> Map<String, Value> {
        let mapping: Map<String, Value> = self
            .mapping
            .iter()
            .map(|(from, to)| (from.clone(), Value::String(to.clone())))
            .collect();
        let mut options = Map::new();
        options.insert("mapping".to_string(), Value::Object(mapping));
        options
    }

    fn transform(&self, record: Record) -> DataFlowResult<Record> {
        let fields = match record {
            Value::Object(fields) => fields,
            other => {
                return Err(DataFlowError::execution_error(format!(
                    "field_map 只能转换JSON对象: {other}"
                )))
            }
        };

        let mapped = self
            .mapping
            .iter()
            .filter_map(|(from, to)| fields.get(from).map(|value| (to.clone(), value.clone())))
            .collect();
        Ok(Value::Object(mapped))
    }
}
