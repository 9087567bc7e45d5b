//! Scheduler configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! worker_id = "nudge-1"
//! poll_interval_secs = 60
//! max_concurrency = 10
//! default_concurrency = 5
//! lock_lifetime_secs = 600
//! job_retention_secs = 604800
//! display_offset_minutes = 540
//! snapshot_path = "data/jobs.json"
//! tasks_path = "data/tasks.json"
//!
//! [retry]
//! enabled = true
//! max_attempts = 3
//! base_delay_secs = 30
//! multiplier = 2.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;
use crate::queue::{DEFAULT_RETENTION, RetryPolicy};

/// Upper bound for `lock_lifetime_secs` (one day).
pub const MAX_LOCK_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// Upper bound for `job_retention_secs` (about ten years).
pub const MAX_JOB_RETENTION_SECS: u64 = 3650 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Recorded as the lock owner on claimed jobs.
    pub worker_id: String,
    pub poll_interval_secs: u64,
    /// Jobs running at once across all kinds.
    pub max_concurrency: usize,
    /// Per-kind ceiling for handlers registered without an explicit one.
    pub default_concurrency: usize,
    /// Lease length; a job held longer is handed to another worker.
    pub lock_lifetime_secs: u64,
    /// How long finished jobs stay in the store; 0 keeps them forever.
    pub job_retention_secs: u64,
    pub retry: RetryConfig,
    /// Offset from UTC used to render deadlines in reminder messages.
    pub display_offset_minutes: i32,
    /// Job snapshot file; `None` keeps jobs in memory only.
    pub snapshot_path: Option<PathBuf>,
    /// Task file. Defaults to `tasks.json` next to `snapshot_path`.
    pub tasks_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_id: "nudge-worker".to_string(),
            poll_interval_secs: 60,
            max_concurrency: 10,
            default_concurrency: 5,
            lock_lifetime_secs: 600,
            job_retention_secs: DEFAULT_RETENTION.num_seconds().unsigned_abs(),
            retry: RetryConfig::default(),
            display_offset_minutes: 0,
            snapshot_path: None,
            tasks_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            enabled: true,
            max_attempts: policy.max_attempts,
            base_delay_secs: policy.base_delay.as_secs(),
            multiplier: policy.multiplier,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> Option<RetryPolicy> {
        self.enabled.then(|| RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            multiplier: self.multiplier,
        })
    }
}

impl SchedulerConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_id.trim().is_empty() {
            return Err(ConfigError::Invalid("worker_id must not be empty".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be at least 1".into()));
        }
        if self.max_concurrency == 0 || self.default_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency limits must be at least 1".into()));
        }
        if !(1..=MAX_LOCK_LIFETIME_SECS).contains(&self.lock_lifetime_secs) {
            return Err(ConfigError::Invalid(format!(
                "lock_lifetime_secs must be between 1 and {MAX_LOCK_LIFETIME_SECS}"
            )));
        }
        if self.job_retention_secs > MAX_JOB_RETENTION_SECS {
            return Err(ConfigError::Invalid(format!(
                "job_retention_secs must be at most {MAX_JOB_RETENTION_SECS}"
            )));
        }
        if self.retry.enabled && (self.retry.max_attempts == 0 || self.retry.multiplier < 1.0) {
            return Err(ConfigError::Invalid(
                "retry needs max_attempts >= 1 and multiplier >= 1.0".into(),
            ));
        }
        self.display_offset()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Clamped to `MAX_LOCK_LIFETIME_SECS` for configs built without `validate`.
    pub fn lock_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_lifetime_secs.min(MAX_LOCK_LIFETIME_SECS) as i64)
    }

    pub fn job_retention(&self) -> Option<chrono::Duration> {
        (self.job_retention_secs > 0).then(|| {
            chrono::Duration::seconds(self.job_retention_secs.min(MAX_JOB_RETENTION_SECS) as i64)
        })
    }

    pub fn task_store_path(&self) -> Option<PathBuf> {
        self.tasks_path.clone().or_else(|| {
            self.snapshot_path
                .as_ref()
                .map(|jobs| jobs.with_file_name("tasks.json"))
        })
    }

    pub fn display_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.display_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "display_offset_minutes out of range: {}",
                    self.display_offset_minutes
                ))
            })
    }
}
