use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub heartbeat_interval_seconds: u64,
    /// Pending runs this far past `run_after` are cancelled at startup
    pub staleness_threshold_seconds: u64,
    pub run_retention_days: u32,
    pub cleanup_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval_seconds: 10,
            staleness_threshold_seconds: 3600,
            run_retention_days: 30,
            cleanup_interval_seconds: 3600,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_interval_seconds(
            self.heartbeat_interval_seconds,
            "scheduler.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.staleness_threshold_seconds,
            "scheduler.staleness_threshold_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.cleanup_interval_seconds,
            "scheduler.cleanup_interval_seconds",
        )?;
        ValidationUtils::validate_count(
            self.run_retention_days as usize,
            "scheduler.run_retention_days",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.staleness_threshold_seconds, 3600);
        assert_eq!(config.run_retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_validation() {
        let mut config = SchedulerConfig::default();
        config.heartbeat_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.run_retention_days = 0;
        assert!(config.validate().is_err());
    }
}
