//! Watcher configuration.
//!
//! Loaded from `<root>/config.toml`. Every field has a default, so a missing
//! file is a valid configuration.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

use crate::storage::write_atomic;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Watcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Whether the scheduler starts jobs on its own.
    pub enabled: bool,

    /// Days between scheduled jobs. Fractions are allowed.
    pub interval_days: f64,

    /// Older configs stored the interval in hours.
    #[serde(skip_serializing)]
    interval_hours: Option<f64>,

    /// How many finished jobs the history keeps.
    pub history_cap: usize,

    /// How often the daemon checks the signal queue and the schedule.
    pub poll_interval_ms: u64,

    /// Size at which `activity.jsonl` rolls over. One older file is kept.
    pub activity_max_bytes: u64,

    pub extraction: ExtractionConfig,

    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExtractionConfig {
    /// Consecutive batches without a new record before extraction is
    /// considered complete.
    pub stall_threshold: u32,

    /// Pause between requests to the source.
    pub request_delay_ms: u64,

    /// Upper bound on batches per job.
    pub max_batches: u32,

    /// Records per batch for the feed extractor.
    pub page_size: usize,

    /// JSON feed of raw records produced by the page scraper.
    pub feed: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReportConfig {
    /// Where report files go. Defaults to `<root>/reports`.
    pub dir: Option<PathBuf>,

    /// Program and arguments run after each report, e.g.
    /// `["/usr/local/bin/notify", "--channel", "ops"]`.
    pub notify_command: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_days: 7.0,
            interval_hours: None,
            history_cap: 50,
            poll_interval_ms: 1000,
            activity_max_bytes: 1024 * 1024,
            extraction: ExtractionConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            stall_threshold: 3,
            request_delay_ms: 500,
            max_batches: 100,
            page_size: 25,
            feed: None,
        }
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(hours) = config.interval_hours.take()
            && !contents.contains("interval-days")
        {
            config.interval_days = hours / 24.0;
        }

        config.validate()?;
        Ok(config)
    }

    /// Write the config to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let toml = toml::to_string_pretty(self).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        write_atomic(path, toml.as_bytes()).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.interval_days.is_finite() || self.interval_days <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "interval-days must be positive, got {}",
                self.interval_days
            )));
        }
        if self.history_cap == 0 {
            return Err(ConfigError::Invalid("history-cap must be at least 1".into()));
        }
        if self.activity_max_bytes == 0 {
            return Err(ConfigError::Invalid(
                "activity-max-bytes must be at least 1".into(),
            ));
        }
        if self.extraction.stall_threshold == 0 {
            return Err(ConfigError::Invalid(
                "extraction.stall-threshold must be at least 1".into(),
            ));
        }
        if self.extraction.page_size == 0 {
            return Err(ConfigError::Invalid(
                "extraction.page-size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Time between scheduled jobs.
    pub fn interval(&self) -> SignedDuration {
        SignedDuration::try_from_secs_f64(self.interval_days * 86_400.0)
            .unwrap_or(SignedDuration::from_hours(24 * 7))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Report directory, relative to the data root when not configured.
    pub fn reports_dir(&self, root: &Path) -> PathBuf {
        self.report
            .dir
            .clone()
            .unwrap_or_else(|| root.join("reports"))
    }
}

impl ExtractionConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}
