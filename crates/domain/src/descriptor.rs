//! 连接器/运行时描述符与游标
//!
//! 描述符是数据流上持久化的不透明结构，形如
//! `{"type_tag": "<实现标识>", <实现自身的选项>...}`。核心只读取其中的
//! `type_tag` 用于重建对象，其余字段原样交给注册的工厂函数。
//! 为兼容旧数据，输入时也接受 `class_name` 作为 `type_tag` 的别名。

use std::cmp::Ordering;
use std::fmt;

use dataflow_errors::{DataFlowError, DataFlowResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 源产出、汇写入的单条记录
pub type Record = Value;

pub const TYPE_TAG_KEY: &str = "type_tag";
pub const LEGACY_TYPE_TAG_KEY: &str = "class_name";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Descriptor {
    pub type_tag: String,
    pub options: Map<String, Value>,
}

impl Descriptor {
    pub fn new<S: Into<String>>(type_tag: S, options: Map<String, Value>) -> Self {
        Self {
            type_tag: type_tag.into(),
            options,
        }
    }

    pub fn tag_only<S: Into<String>>(type_tag: S) -> Self {
        Self::new(type_tag, Map::new())
    }

    /// 从持久化的 JSON 值解析描述符，结构不合法时返回 `Rehydration` 错误
    pub fn from_value(value: &Value) -> DataFlowResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            DataFlowError::rehydration_error("<unknown>", format!("描述符必须是JSON对象: {value}"))
        })?;

        let type_tag = object
            .get(TYPE_TAG_KEY)
            .or_else(|| object.get(LEGACY_TYPE_TAG_KEY))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| {
                DataFlowError::rehydration_error("<missing>", format!("描述符缺少类型标签: {value}"))
            })?
            .to_string();

        let options = object
            .iter()
            .filter(|(key, _)| key.as_str() != TYPE_TAG_KEY && key.as_str() != LEGACY_TYPE_TAG_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self { type_tag, options })
    }

    pub fn parse(raw: &str) -> DataFlowResult<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            DataFlowError::rehydration_error("<unparsed>", format!("描述符不是合法JSON: {e}"))
        })?;
        Self::from_value(&value)
    }

    pub fn to_value(&self) -> Value {
        let mut object = self.options.clone();
        object.insert(TYPE_TAG_KEY.to_string(), Value::String(self.type_tag.clone()));
        Value::Object(object)
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn with_option<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

impl TryFrom<Value> for Descriptor {
    type Error = DataFlowError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Descriptor::from_value(&value)
    }
}

impl From<Descriptor> for Value {
    fn from(descriptor: Descriptor) -> Self {
        descriptor.to_value()
    }
}

/// 增量处理游标：源定义的不透明位置标记（通常是最后处理的记录 id）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Value);

impl Cursor {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// 持久化为 JSON 文本，数值与字符串游标都能无损往返
    pub fn to_storage(&self) -> String {
        self.0.to_string()
    }

    pub fn from_storage(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(value) => Self(value),
            Err(_) => Self(Value::String(raw.to_string())),
        }
    }

    /// 数值按数值比较，字符串按字典序比较，其他组合不可比较
    pub fn compare(&self, other: &Cursor) -> Option<Ordering> {
        compare_ids(&self.0, &other.0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{s}"),
            other => write!(f, "{other}"),
        }
    }
}

impl From<i64> for Cursor {
    fn from(value: i64) -> Self {
        Self(Value::from(value))
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

pub fn compare_ids(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                return Some(a.cmp(&b));
            }
            Some(a.as_f64()?.total_cmp(&b.as_f64()?))
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn id_rank(id: Option<&Value>) -> u8 {
    match id {
        Some(Value::Number(_)) => 0,
        Some(Value::String(_)) => 1,
        _ => 2,
    }
}

/// 记录 id 的全序：数值在前，字符串其次，缺失或其他类型排在最后且彼此相等
pub fn order_ids(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    id_rank(left).cmp(&id_rank(right)).then_with(|| match (left, right) {
        (Some(a), Some(b)) => compare_ids(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    })
}

/// 记录是否严格位于游标之后。缺失 id 或非数值、非字符串 id 的记录在有游标时不参与
pub fn is_after_cursor(id: Option<&Value>, cursor: Option<&Cursor>) -> bool {
    match cursor {
        None => true,
        Some(cursor) => id
            .filter(|id| id_rank(Some(id)) < 2)
            .map_or(false, |id| order_ids(Some(id), Some(cursor.value())) == Ordering::Greater),
    }
}
