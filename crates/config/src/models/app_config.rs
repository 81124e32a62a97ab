use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{
    database::DatabaseConfig, flows::FlowDefinition, logging::ObservabilityConfig,
    scheduler::SchedulerConfig,
};
use crate::validation::ConfigValidator;

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/dataflow.toml", "dataflow.toml"];
pub const ENV_PREFIX: &str = "DATAFLOW";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
    pub flows: Vec<FlowDefinition>,
}

impl AppConfig {
    /// 依次叠加内置默认值、配置文件和 `DATAFLOW_` 前缀的环境变量
    ///
    /// 环境变量用双下划线分隔层级，例如 `DATAFLOW_DATABASE__URL`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.scheduler.validate()?;
        self.observability.validate()?;

        let mut names = HashSet::new();
        for flow in &self.flows {
            flow.validate()?;
            if !names.insert(flow.name.as_str()) {
                return Err(crate::ConfigError::Validation(format!(
                    "duplicate flow name: {}",
                    flow.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatabaseBackend, LogLevel, OutputFormat};
    use serde_json::json;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.database.backend(), Some(DatabaseBackend::Sqlite));
        assert_eq!(config.scheduler.heartbeat_interval_seconds, 10);
        assert!(config.flows.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[database]
url = "postgresql://localhost/dataflow"
max_connections = 20

[scheduler]
heartbeat_interval_seconds = 5
staleness_threshold_seconds = 1800

[observability]
log_level = "debug"
log_format = "json"

[[flows]]
name = "users"
source = { type_tag = "jsonl_file", path = "/data/users.jsonl" }
sink = { type_tag = "log", label = "users" }
runtime = { type_tag = "default", interval = 60, batch_size = 3, enabled = true }

[[flows]]
name = "archive"
source = { class_name = "inline", records = [{ id = 1 }] }
sink = { type_tag = "log" }
"#;

        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.scheduler.heartbeat_interval_seconds, 5);
        assert_eq!(config.scheduler.run_retention_days, 30);
        assert_eq!(config.observability.log_level, LogLevel::Debug);
        assert_eq!(config.observability.log_format, OutputFormat::Json);

        assert_eq!(config.flows.len(), 2);
        assert_eq!(config.flows[0].runtime.as_ref().unwrap()["batch_size"], json!(3));
        assert_eq!(config.flows[1].source["records"], json!([{"id": 1}]));
        assert!(config.flows[1].runtime.is_none());
    }

    #[test]
    fn test_duplicate_flow_names_rejected() {
        let toml_str = r#"
[[flows]]
name = "users"
source = { type_tag = "inline" }
sink = { type_tag = "log" }

[[flows]]
name = "users"
source = { type_tag = "inline" }
sink = { type_tag = "log" }
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_app_config_toml_round_trip() {
        let mut config = AppConfig::default();
        config.flows.push(FlowDefinition {
            name: "users".to_string(),
            source: json!({"type_tag": "inline", "records": [{"id": 1}]}),
            sink: json!({"type_tag": "log"}),
            runtime: Some(json!({"type_tag": "default", "interval": 30})),
        });

        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.flows, config.flows);
        assert_eq!(parsed.database.url, config.database.url);
    }
}
