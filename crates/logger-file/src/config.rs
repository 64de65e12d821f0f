//! Configuration for the rotating file writer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::rule::{DailyRotationRule, HourlyRotationRule, RotationRule, SizeLimitRotationRule};

/// Rotation policy for log files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RotationPolicy {
    /// Rotate when the file would exceed `max_size` bytes (0 disables)
    Size {
        /// Maximum size of the active file in bytes
        max_size: u64,
        /// Maximum number of backups to keep (0 = unlimited)
        max_backups: usize,
        /// Days to keep backups (0 = forever)
        keep_days: u32,
    },
    /// Rotate once per calendar day
    Daily {
        /// Days to keep backups (0 = forever)
        keep_days: u32,
    },
    /// Rotate once per hour
    Hourly {
        /// Hours to keep backups (0 = forever)
        keep_hours: u32,
    },
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily { keep_days: 0 }
    }
}

impl RotationPolicy {
    /// Construct the rule implementing this policy for `path`.
    pub fn build_rule(
        &self,
        path: impl Into<PathBuf>,
        delimiter: &str,
        compress: bool,
        local_time: bool,
        clock: Arc<dyn Clock>,
    ) -> Arc<dyn RotationRule> {
        match *self {
            Self::Size {
                max_size,
                max_backups,
                keep_days,
            } => Arc::new(
                SizeLimitRotationRule::with_clock(
                    path,
                    delimiter,
                    keep_days,
                    max_size,
                    max_backups,
                    compress,
                    clock,
                )
                .local_time(local_time),
            ),
            Self::Daily { keep_days } => Arc::new(
                DailyRotationRule::with_clock(path, delimiter, keep_days, compress, clock)
                    .local_time(local_time),
            ),
            Self::Hourly { keep_hours } => Arc::new(
                HourlyRotationRule::with_clock(path, delimiter, keep_hours, compress, clock)
                    .local_time(local_time),
            ),
        }
    }
}

/// Configuration for a rotating log file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggerConfig {
    /// Path of the active log file
    pub path: PathBuf,

    /// When to rotate and how long to keep backups
    pub rotation: RotationPolicy,

    /// Separator between the file name and a backup label
    pub delimiter: String,

    /// Gzip rotated backups
    pub compress: bool,

    /// Render backup labels in local time instead of UTC
    pub local_time: bool,

    /// Staged bytes that trigger a handoff to the worker
    pub flush_threshold: usize,

    /// Maximum time staged bytes wait before being written
    pub flush_interval: Duration,

    /// Full buffers that may queue for the worker before writers block
    pub handoff_capacity: usize,

    /// Staging buffers that may be outstanding at once
    pub buffer_capacity: usize,
}

impl Default for FileLoggerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs/app.log"),
            rotation: RotationPolicy::default(),
            delimiter: "-".to_string(),
            compress: false,
            local_time: false,
            flush_threshold: 4096,
            flush_interval: Duration::from_millis(500),
            handoff_capacity: 3,
            buffer_capacity: 500,
        }
    }
}

impl FileLoggerConfig {
    /// Start building a configuration for the file at `path`.
    pub fn builder(path: impl Into<PathBuf>) -> FileLoggerConfigBuilder {
        FileLoggerConfigBuilder::new(path)
    }

    /// Check that the configuration can drive a writer.
    pub fn validate(&self) -> Result<()> {
        if self.path.file_name().is_none() {
            return Err(Error::Configuration(format!(
                "log path {} has no file name",
                self.path.display()
            )));
        }
        if self.delimiter.is_empty() {
            return Err(Error::Configuration(
                "backup delimiter must not be empty".to_string(),
            ));
        }
        if self.flush_threshold == 0 {
            return Err(Error::Configuration(
                "flush threshold must be positive".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Configuration(
                "flush interval must be positive".to_string(),
            ));
        }
        if self.handoff_capacity == 0 {
            return Err(Error::Configuration(
                "handoff capacity must be positive".to_string(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Configuration(
                "buffer capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`FileLoggerConfig`]
#[derive(Debug, Clone)]
pub struct FileLoggerConfigBuilder {
    config: FileLoggerConfig,
}

impl FileLoggerConfigBuilder {
    /// Create a builder with default settings for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            config: FileLoggerConfig {
                path: path.into(),
                ..FileLoggerConfig::default()
            },
        }
    }

    /// Set the rotation policy
    #[must_use]
    pub fn rotation(mut self, rotation: RotationPolicy) -> Self {
        self.config.rotation = rotation;
        self
    }

    /// Rotate by size, with the limit given in megabytes
    #[must_use]
    pub fn max_size_mb(mut self, max_size_mb: u64, max_backups: usize, keep_days: u32) -> Self {
        self.config.rotation = RotationPolicy::Size {
            max_size: max_size_mb * 1024 * 1024,
            max_backups,
            keep_days,
        };
        self
    }

    /// Set the backup label delimiter
    #[must_use]
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.config.delimiter = delimiter.into();
        self
    }

    /// Enable or disable gzip compression of backups
    #[must_use]
    pub fn compress(mut self, compress: bool) -> Self {
        self.config.compress = compress;
        self
    }

    /// Use local time for backup labels
    #[must_use]
    pub fn local_time(mut self, local_time: bool) -> Self {
        self.config.local_time = local_time;
        self
    }

    /// Set the staging flush threshold in bytes
    #[must_use]
    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.config.flush_threshold = bytes;
        self
    }

    /// Set the periodic flush interval
    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// Set the handoff channel capacity
    #[must_use]
    pub fn handoff_capacity(mut self, capacity: usize) -> Self {
        self.config.handoff_capacity = capacity;
        self
    }

    /// Set the number of staging buffers
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<FileLoggerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
