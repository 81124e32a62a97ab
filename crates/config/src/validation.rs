use crate::ConfigResult;

/// Upper bound for a flow runtime `interval`: one year
pub const MAX_RUNTIME_INTERVAL_SECONDS: u64 = 366 * 24 * 3600;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that an interval is positive and not absurdly large
    pub fn validate_interval_seconds(seconds: u64, field_name: &str) -> ConfigResult<()> {
        if seconds == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if seconds > 31 * 24 * 3600 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 31 days"
            )));
        }
        Ok(())
    }

    /// Validate that a count is reasonable
    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > 10000 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 10000"
            )));
        }
        Ok(())
    }

    /// Validate that a descriptor is a table carrying a non-empty `type_tag` (or `class_name`)
    pub fn validate_descriptor(value: &serde_json::Value, field_name: &str) -> ConfigResult<()> {
        let table = value.as_object().ok_or_else(|| {
            crate::ConfigError::Validation(format!("{field_name} must be a table"))
        })?;
        let tag = table
            .get("type_tag")
            .or_else(|| table.get("class_name"))
            .and_then(|tag| tag.as_str())
            .unwrap_or_default();
        Self::validate_not_empty(tag, &format!("{field_name}.type_tag"))
    }

    /// Validate the scheduling options of a runtime descriptor, when present
    pub fn validate_runtime_interval(value: &serde_json::Value, field_name: &str) -> ConfigResult<()> {
        let Some(interval) = value.get("interval") else {
            return Ok(());
        };
        match interval.as_u64() {
            Some(seconds) if seconds > 0 && seconds <= MAX_RUNTIME_INTERVAL_SECONDS => Ok(()),
            _ => Err(crate::ConfigError::Validation(format!(
                "{field_name}.interval must be a whole number of seconds between 1 and {MAX_RUNTIME_INTERVAL_SECONDS}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("test", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("  test  ", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("", "field").is_err());
        assert!(ValidationUtils::validate_not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_validate_interval_seconds() {
        assert!(ValidationUtils::validate_interval_seconds(1, "interval").is_ok());
        assert!(ValidationUtils::validate_interval_seconds(3600, "interval").is_ok());
        assert!(ValidationUtils::validate_interval_seconds(0, "interval").is_err());
        assert!(ValidationUtils::validate_interval_seconds(40 * 24 * 3600, "interval").is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(10, "test").is_ok());
        assert!(ValidationUtils::validate_count(10000, "test").is_ok());
        assert!(ValidationUtils::validate_count(0, "test").is_err());
        assert!(ValidationUtils::validate_count(10001, "test").is_err());
    }

    #[test]
    fn test_validate_descriptor() {
        assert!(ValidationUtils::validate_descriptor(&json!({"type_tag": "log"}), "sink").is_ok());
        assert!(ValidationUtils::validate_descriptor(&json!({"class_name": "log"}), "sink").is_ok());
        assert!(ValidationUtils::validate_descriptor(&json!({"path": "x"}), "sink").is_err());
        assert!(ValidationUtils::validate_descriptor(&json!("log"), "sink").is_err());
    }

    #[test]
    fn test_validate_runtime_interval() {
        let check = |value| ValidationUtils::validate_runtime_interval(&value, "runtime");
        assert!(check(json!({"type_tag": "default"})).is_ok());
        assert!(check(json!({"type_tag": "default", "interval": 60})).is_ok());
        assert!(check(json!({"type_tag": "default", "interval": MAX_RUNTIME_INTERVAL_SECONDS})).is_ok());
        assert!(check(json!({"type_tag": "default", "interval": 0})).is_err());
        assert!(check(json!({"type_tag": "default", "interval": "soon"})).is_err());
        assert!(check(json!({"type_tag": "default", "interval": 10_000_000_000_000u64})).is_err());
    }
}
