use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A data flow declared in configuration, registered at startup.
///
/// Each slot is a descriptor table: `{ type_tag = "...", <options>... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    pub source: Value,
    pub sink: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<Value>,
}

impl ConfigValidator for FlowDefinition {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.name, "flows.name")?;
        ValidationUtils::validate_descriptor(&self.source, &format!("flows.{}.source", self.name))?;
        ValidationUtils::validate_descriptor(&self.sink, &format!("flows.{}.sink", self.name))?;
        if let Some(runtime) = &self.runtime {
            let field = format!("flows.{}.runtime", self.name);
            ValidationUtils::validate_descriptor(runtime, &field)?;
            ValidationUtils::validate_runtime_interval(runtime, &field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flow_definition_validation() {
        let flow = FlowDefinition {
            name: "users".to_string(),
            source: json!({"type_tag": "inline", "records": []}),
            sink: json!({"type_tag": "log"}),
            runtime: None,
        };
        assert!(flow.validate().is_ok());

        let mut invalid = flow.clone();
        invalid.name = " ".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = flow.clone();
        invalid.sink = json!({"label": "x"});
        assert!(invalid.validate().is_err());

        let mut invalid = flow.clone();
        invalid.runtime = Some(json!(42));
        assert!(invalid.validate().is_err());

        let mut invalid = flow;
        invalid.runtime = Some(json!({"type_tag": "default", "interval": 10_000_000_000_000u64}));
        assert!(invalid.validate().is_err());
    }
}
