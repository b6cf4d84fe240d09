//! Configuration management
//!
//! YAML-based configuration with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:datatrail.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

/// Retention sweep configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Enable/disable the background sweep scheduler
    #[serde(default = "default_retention_enabled")]
    pub enabled: bool,
    /// Cron expression (with seconds field) for scheduled sweeps
    #[serde(default = "default_sweep_schedule")]
    pub sweep_schedule: String,
    /// Rows fetched per scan batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Wall-clock budget for one sweep run, per policy
    #[serde(default = "default_time_budget")]
    pub time_budget_secs: u64,
    /// Replacement value written over identifying fields
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_retention_enabled(),
            sweep_schedule: default_sweep_schedule(),
            batch_size: default_batch_size(),
            time_budget_secs: default_time_budget(),
            sentinel: default_sentinel(),
        }
    }
}

fn default_retention_enabled() -> bool {
    true
}

fn default_sweep_schedule() -> String {
    // Daily at 03:00 UTC
    "0 0 3 * * *".to_string()
}

fn default_batch_size() -> u32 {
    500
}

fn default_time_budget() -> u64 {
    300
}

fn default_sentinel() -> String {
    "anonymized".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with DATATRAIL_)
    pub fn load() -> Result<Self> {
        // Pick up a .env file if one exists
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("DATATRAIL_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = if let Some(ref path) = config_path {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {path:?}"))?;
            serde_norway::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {path:?}"))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/datatrail/config.yaml"),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATATRAIL_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = std::env::var("DATATRAIL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(schedule) = std::env::var("DATATRAIL_SWEEP_SCHEDULE") {
            self.retention.sweep_schedule = schedule;
        }
        if let Ok(sentinel) = std::env::var("DATATRAIL_SENTINEL") {
            self.retention.sentinel = sentinel;
        }
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("database.url must not be empty");
        }
        if self.retention.batch_size == 0 {
            anyhow::bail!("retention.batch_size must be > 0");
        }
        if self.retention.time_budget_secs == 0 {
            anyhow::bail!("retention.time_budget_secs must be > 0");
        }
        if self.retention.sentinel.is_empty() {
            anyhow::bail!("retention.sentinel must not be empty");
        }
        cron::Schedule::from_str(&self.retention.sweep_schedule).with_context(|| {
            format!(
                "retention.sweep_schedule is not a valid cron expression: '{}'",
                self.retention.sweep_schedule
            )
        })?;
        Ok(())
    }
}
