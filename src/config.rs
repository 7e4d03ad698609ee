//! Configuration loaded from TOML.
//!
//! Every section is optional; a missing key takes its default.
//!
//! ```toml
//! [store]
//! path = "/var/lib/pollwatch/pollwatch.db"
//!
//! [poll]
//! interval_secs = 300
//!
//! [notify]
//! caption_limit = 200
//! alerted_capacity = 100000
//!
//! [limits]
//! per_subscriber_accounts = 20
//!
//! [log]
//! level = "info"
//! format = "json"
//! ```

use crate::error::ConfigError;
use crate::notify::DEFAULT_CAPTION_LIMIT;
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::store::{MonitorLimits, StoreConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub store: StoreSection,
    pub poll: PollConfig,
    pub notify: NotifyConfig,
    pub limits: LimitsConfig,
    pub log: LogConfig,
}

/// Store file and compaction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub path: PathBuf,
    /// fsync each commit.
    pub sync_on_commit: bool,
    pub compact_min_bytes: u64,
    pub compact_ratio: f64,
}

impl Default for StoreSection {
    fn default() -> Self {
        let defaults = StoreConfig::default();
        Self {
            path: PathBuf::from("pollwatch.db"),
            sync_on_commit: defaults.sync_on_commit,
            compact_min_bytes: defaults.compact_min_bytes,
            compact_ratio: defaults.compact_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between cycles.
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Maximum visible characters of a media caption.
    pub caption_limit: usize,
    /// (subscriber, item) pairs remembered for deduplication.
    pub alerted_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            caption_limit: DEFAULT_CAPTION_LIMIT,
            alerted_capacity: 100_000,
        }
    }
}

/// Account-monitor caps. Unset means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub per_subscriber_accounts: Option<usize>,
    pub total_accounts: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl NotifierConfig {
    /// Read and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll.interval_secs must be at least 1".into(),
            ));
        }
        if self.notify.alerted_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notify.alerted_capacity must be at least 1".into(),
            ));
        }
        if self.notify.caption_limit == 0 {
            return Err(ConfigError::Invalid(
                "notify.caption_limit must be at least 1".into(),
            ));
        }
        if self.store.compact_ratio.is_nan() || self.store.compact_ratio < 1.0 {
            return Err(ConfigError::Invalid(
                "store.compact_ratio must be at least 1.0".into(),
            ));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".into()));
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.store.path.clone(),
            create_if_missing: true,
            sync_on_commit: self.store.sync_on_commit,
            compact_min_bytes: self.store.compact_min_bytes,
            compact_ratio: self.store.compact_ratio,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn monitor_limits(&self) -> MonitorLimits {
        MonitorLimits {
            per_subscriber: self.limits.per_subscriber_accounts,
            total: self.limits.total_accounts,
        }
    }
}
