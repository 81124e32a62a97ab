#[cfg(test)]
mod loader_tests {
    use crate::{AppConfig, DatabaseBackend};

    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(AppConfig::load(Some(path.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_load_file_and_environment_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataflow.toml");
        fs::write(
            &path,
            r#"
[database]
url = "sqlite::memory:"

[scheduler]
heartbeat_interval_seconds = 2

[[flows]]
name = "demo"
source = { type_tag = "inline", records = [{ id = 1 }, { id = 2 }] }
sink = { type_tag = "log" }
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.database.backend(), Some(DatabaseBackend::Sqlite));
        assert_eq!(config.scheduler.heartbeat_interval_seconds, 2);
        // 文件未提供的字段来自内置默认值
        assert_eq!(config.scheduler.staleness_threshold_seconds, 3600);
        assert_eq!(config.flows.len(), 1);
        assert_eq!(config.flows[0].source["records"][1]["id"], 2);

        std::env::set_var("DATAFLOW_SCHEDULER__RUN_RETENTION_DAYS", "7");
        let overridden = AppConfig::load(Some(path.to_str().unwrap()));
        std::env::remove_var("DATAFLOW_SCHEDULER__RUN_RETENTION_DAYS");
        assert_eq!(overridden.unwrap().scheduler.run_retention_days, 7);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(
            &path,
            r#"
[[flows]]
name = "demo"
source = { records = [] }
sink = { type_tag = "log" }
"#,
        )
        .unwrap();

        let err = AppConfig::load(Some(path.to_str().unwrap())).unwrap_err();
        assert!(err.to_string().contains("type_tag"), "{err}");
    }
}
