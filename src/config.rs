//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::interrupt::FlowOrigin;
use crate::{AppError, Result};

/// Interrupt registry limits and timeouts.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InterruptConfig {
    /// Expiry applied to requests registered without an explicit one.
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// Live request count that triggers an expired-entry sweep. Undelivered
    /// answers are bounded per request (one slot each), not by this value.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Number of requests retained in the audit history ring.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_timeout_seconds(),
            max_pending: default_max_pending(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl InterruptConfig {
    /// Default expiry as a [`Duration`].
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

/// Resumable execution flow settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FlowConfig {
    /// Step budget handed to the turn executor.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Which caller style owns interrupts raised by this flow.
    #[serde(default)]
    pub origin: FlowOrigin,
    /// Keep only the last N session messages after each turn; 0 disables.
    #[serde(default)]
    pub compact_keep_messages: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            origin: FlowOrigin::default(),
            compact_keep_messages: 0,
        }
    }
}

/// Background job manager settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobConfig {
    /// Maximum jobs in pending or running state at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Directory holding the per-day job archive files.
    pub archive_dir: PathBuf,
    /// Wall-clock deadline per job; 0 means none.
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Log lines retained per live job.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

impl JobConfig {
    /// Create a job config with defaults for everything but the archive.
    #[must_use]
    pub fn new(archive_dir: PathBuf) -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            archive_dir,
            timeout_seconds: 0,
            log_capacity: default_log_capacity(),
        }
    }

    /// Per-job deadline, if configured.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

fn default_timeout_seconds() -> u64 {
    1800
}

fn default_max_pending() -> usize {
    100
}

fn default_history_capacity() -> usize {
    500
}

fn default_max_steps() -> u32 {
    25
}

fn default_max_concurrent() -> usize {
    3
}

fn default_log_capacity() -> usize {
    200
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interrupt registry settings.
    #[serde(default)]
    pub interrupts: InterruptConfig,
    /// Resumable flow settings.
    #[serde(default)]
    pub flow: FlowConfig,
    /// Background job settings.
    pub jobs: JobConfig,
    /// Directory for daily JSONL audit files; auditing is off when absent.
    #[serde(default)]
    pub audit_dir: Option<PathBuf>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.interrupts.max_pending == 0 {
            return Err(AppError::Config(
                "interrupts.max_pending must be greater than zero".into(),
            ));
        }
        if self.interrupts.history_capacity == 0 {
            return Err(AppError::Config(
                "interrupts.history_capacity must be greater than zero".into(),
            ));
        }
        if self.flow.max_steps == 0 {
            return Err(AppError::Config(
                "flow.max_steps must be greater than zero".into(),
            ));
        }
        if self.jobs.max_concurrent == 0 {
            return Err(AppError::Config(
                "jobs.max_concurrent must be greater than zero".into(),
            ));
        }
        if self.jobs.log_capacity == 0 {
            return Err(AppError::Config(
                "jobs.log_capacity must be greater than zero".into(),
            ));
        }
        if self.jobs.archive_dir.as_os_str().is_empty() {
            return Err(AppError::Config("jobs.archive_dir must not be empty".into()));
        }
        Ok(())
    }
}
