//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::storage::BackendKind;

/// Root application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Public identity of this registry instance
    #[serde(default)]
    pub instance: InstanceConfig,

    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Background refresh and persistence intervals
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Persistence backend selection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Log verbosity
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if !crate::utils::is_http_url(&self.instance.url) {
            return Err(AppError::config(format!(
                "instance.url must be an http(s) URL, got {:?}",
                self.instance.url
            )));
        }
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::config("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::config("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::config("crawler.max_concurrent must be > 0"));
        }
        if self.schedule.refresh_interval_secs == 0 {
            return Err(AppError::config("schedule.refresh_interval_secs must be > 0"));
        }
        if self.schedule.push_interval_secs == 0 {
            return Err(AppError::config("schedule.push_interval_secs must be > 0"));
        }
        self.database.backend_kind()?;
        if self.database.path.as_os_str().is_empty() {
            return Err(AppError::config("database.path is empty"));
        }
        Ok(())
    }
}

/// Metadata about this registry instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Public URL; peer submissions containing it are rejected
    #[serde(default = "defaults::instance_url")]
    pub url: String,

    #[serde(default = "defaults::instance_name")]
    pub name: String,

    #[serde(default = "defaults::owner")]
    pub owner: String,

    #[serde(default = "defaults::email")]
    pub email: String,

    #[serde(default = "defaults::description")]
    pub description: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            url: defaults::instance_url(),
            name: defaults::instance_name(),
            owner: defaults::owner(),
            email: defaults::email(),
            description: defaults::description(),
        }
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum feeds refreshed at once during a sweep
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Periodic task intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between feed refresh sweeps
    #[serde(default = "defaults::refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Seconds between pushes of the index to disk
    #[serde(default = "defaults::push_interval")]
    pub push_interval_secs: u64,
}

impl ScheduleConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: defaults::refresh_interval(),
            push_interval_secs: defaults::push_interval(),
        }
    }
}

/// Persistence backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend kind: "kv" (alias "leveldb") or "sqlite"
    #[serde(default = "defaults::db_kind")]
    pub kind: String,

    /// Path of the backend's file
    #[serde(default = "defaults::db_path")]
    pub path: PathBuf,
}

impl DatabaseConfig {
    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.kind.parse()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: defaults::db_kind(),
            path: defaults::db_path(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter passed to env_logger when RUST_LOG is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Instance defaults
    pub fn instance_url() -> String {
        "https://twtxt.example.com".into()
    }
    pub fn instance_name() -> String {
        "registry".into()
    }
    pub fn owner() -> String {
        "Anonymous Microblogger".into()
    }
    pub fn email() -> String {
        "nobody@knows".into()
    }
    pub fn description() -> String {
        "A federated twtxt registry".into()
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        concat!("registry/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        10
    }
    pub fn max_concurrent() -> usize {
        8
    }

    // Schedule defaults
    pub fn refresh_interval() -> u64 {
        60 * 60
    }
    pub fn push_interval() -> u64 {
        5 * 60
    }

    // Database defaults
    pub fn db_kind() -> String {
        "kv".into()
    }
    pub fn db_path() -> PathBuf {
        PathBuf::from("registry.db")
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let mut config = Config::default();
        config.schedule.push_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_backend() {
        let mut config = Config::default();
        config.database.kind = "postgres".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [instance]
            url = "https://reg.example.org"

            [schedule]
            refresh_interval_secs = 120

            [database]
            kind = "sqlite"
            path = "data/registry.sqlite"
            "#,
        )
        .unwrap();

        assert_eq!(config.instance.url, "https://reg.example.org");
        assert_eq!(config.schedule.refresh_interval(), Duration::from_secs(120));
        assert_eq!(config.schedule.push_interval(), Duration::from_secs(300));
        assert_eq!(config.database.backend_kind().unwrap(), BackendKind::Sqlite);
        assert_eq!(config.crawler.timeout_secs, 10);
    }
}
