//! Switchyard configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SwitchyardError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchyardConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub broadcasts: BroadcastConfig,
    #[serde(default)]
    pub campaigns: CampaignConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SwitchyardConfig {
    /// Load config from the default path (~/.switchyard/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SwitchyardError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SwitchyardError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.broadcasts.batch_size == 0 {
            return Err(SwitchyardError::Config(
                "broadcasts.batch_size must be at least 1".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(SwitchyardError::Config(
                "queue.max_attempts must be at least 1".into(),
            ));
        }
        if self.queue.lease_secs <= self.queue.task_deadline_secs {
            return Err(SwitchyardError::Config(format!(
                "queue.lease_secs ({}) must exceed queue.task_deadline_secs ({})",
                self.queue.lease_secs, self.queue.task_deadline_secs
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Switchyard home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".switchyard")
    }
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String { "~/.switchyard/switchyard.db".into() }
fn default_busy_timeout_ms() -> u64 { 5_000 }

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Which broker implementation backs the task queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process queues, lost on restart.
    Memory,
    /// Durable queues stored next to the data in SQLite.
    Sqlite,
}

/// Task queue and worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_backend")]
    pub backend: QueueBackend,
    #[serde(default = "default_handler_workers")]
    pub handler_workers: usize,
    #[serde(default = "default_batch_workers")]
    pub batch_workers: usize,
    /// Idle sleep between empty polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Deadline for one task execution.
    #[serde(default = "default_task_deadline_secs")]
    pub task_deadline_secs: u64,
    /// How long a popped task stays invisible before another worker may reclaim it.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_backend() -> QueueBackend { QueueBackend::Sqlite }
fn default_handler_workers() -> usize { 4 }
fn default_batch_workers() -> usize { 2 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_task_deadline_secs() -> u64 { 3_600 }
fn default_lease_secs() -> u64 { 3_900 }
fn default_max_attempts() -> u32 { 3 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            handler_workers: default_handler_workers(),
            batch_workers: default_batch_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            task_deadline_secs: default_task_deadline_secs(),
            lease_secs: default_lease_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Broadcast fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Contacts per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Broadcasts with at most this many recipients go to the handler queue.
    #[serde(default = "default_low_latency_threshold")]
    pub low_latency_threshold: usize,
}

fn default_batch_size() -> usize { 100 }
fn default_low_latency_threshold() -> usize { 2 }

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            low_latency_threshold: default_low_latency_threshold(),
        }
    }
}

/// Campaign fire poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    #[serde(default = "default_campaign_poll_secs")]
    pub poll_interval_secs: u64,
    /// Maximum due fires picked up by one poll.
    #[serde(default = "default_fire_batch_size")]
    pub fire_batch_size: usize,
}

fn default_campaign_poll_secs() -> u64 { 60 }
fn default_fire_batch_size() -> usize { 500 }

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_campaign_poll_secs(),
            fire_batch_size: default_fire_batch_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SwitchyardConfig::default();
        assert_eq!(config.broadcasts.batch_size, 100);
        assert_eq!(config.broadcasts.low_latency_threshold, 2);
        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert_eq!(config.queue.task_deadline_secs, 3_600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [queue]
            backend = "memory"
            handler_workers = 8

            [broadcasts]
            batch_size = 250

            [logging]
            json = true
        "#;

        let config: SwitchyardConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.queue.handler_workers, 8);
        assert_eq!(config.queue.batch_workers, 2);
        assert_eq!(config.broadcasts.batch_size, 250);
        assert!(config.logging.json);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: SwitchyardConfig = toml::from_str("").unwrap();
        assert_eq!(config.campaigns.poll_interval_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_short_lease() {
        let mut config = SwitchyardConfig::default();
        config.queue.lease_secs = config.queue.task_deadline_secs;
        assert!(matches!(config.validate(), Err(SwitchyardError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("switchyard-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[campaigns]\nfire_batch_size = 42\n").unwrap();
        let config = SwitchyardConfig::load_from(&path).unwrap();
        assert_eq!(config.campaigns.fire_batch_size, 42);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = SwitchyardConfig::home_dir();
        assert!(home.to_string_lossy().contains("switchyard"));
    }

    #[test]
    fn test_expanded_db_path() {
        let db = DatabaseConfig::default();
        assert!(!db.expanded_path().to_string_lossy().starts_with('~'));
    }
}
