//! Size-limited rotation with backup-count and age pruning.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;

use super::{FILE_TIME_FORMAT, GZIP_EXT, Naming, RotationRule, glob_files};
use crate::clock::{Clock, SystemClock};

/// Rotates the log file once it would grow beyond a byte limit.
///
/// Backups are named `{dir}/{prefix}{delimiter}{timestamp}{ext}`, where
/// `app.log` splits into prefix `app` and extension `.log`. The timestamp has
/// millisecond resolution so several rotations per day never collide.
#[derive(Debug)]
pub struct SizeLimitRotationRule {
    naming: Naming,
    /// Retention in days; 0 keeps backups forever.
    keep_days: u32,
    /// Byte limit; 0 disables size-based rotation.
    max_size: u64,
    /// Backup count limit; 0 keeps any number of backups.
    max_backups: usize,
    rotated: Mutex<String>,
}

impl SizeLimitRotationRule {
    /// Create a size rule.
    pub fn new(
        filename: impl Into<PathBuf>,
        delimiter: impl Into<String>,
        keep_days: u32,
        max_size: u64,
        max_backups: usize,
        gzip: bool,
    ) -> Self {
        Self::with_clock(
            filename,
            delimiter,
            keep_days,
            max_size,
            max_backups,
            gzip,
            Arc::new(SystemClock),
        )
    }

    /// Same as [`SizeLimitRotationRule::new`] with an explicit time source.
    pub fn with_clock(
        filename: impl Into<PathBuf>,
        delimiter: impl Into<String>,
        keep_days: u32,
        max_size: u64,
        max_backups: usize,
        gzip: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let naming = Naming {
            filename: filename.into(),
            delimiter: delimiter.into(),
            gzip,
            local_time: false,
            clock,
        };
        let rotated = naming.label(naming.now(), FILE_TIME_FORMAT);
        Self {
            naming,
            keep_days,
            max_size,
            max_backups,
            rotated: Mutex::new(rotated),
        }
    }

    /// Render timestamps in the local time zone instead of UTC.
    #[must_use]
    pub fn local_time(mut self, local_time: bool) -> Self {
        self.naming.local_time = local_time;
        *self.rotated.get_mut() = self.naming.label(self.naming.now(), FILE_TIME_FORMAT);
        self
    }

    /// Timestamp of the last rotation.
    pub fn last_rotation(&self) -> String {
        self.rotated.lock().clone()
    }

    fn dir(&self) -> &Path {
        self.naming.filename.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Split the file name into prefix and extension (with its dot).
    fn split_filename(&self) -> (String, String) {
        let filename = &self.naming.filename;
        let prefix = filename
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = filename
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (prefix, ext)
    }

    fn backup_with_label(&self, label: &str) -> PathBuf {
        let (prefix, ext) = self.split_filename();
        self.dir()
            .join(format!("{prefix}{}{label}{ext}", self.naming.delimiter))
    }

    fn backup_pattern(&self) -> String {
        let (prefix, ext) = self.split_filename();
        let head = self
            .dir()
            .join(format!("{prefix}{}", self.naming.delimiter));

        let mut pattern = glob::Pattern::escape(&head.to_string_lossy());
        pattern.push('*');
        pattern.push_str(&glob::Pattern::escape(&ext));
        if self.naming.gzip {
            pattern.push_str(GZIP_EXT);
        }
        pattern
    }
}

impl RotationRule for SizeLimitRotationRule {
    fn shall_rotate(&self, size: u64) -> bool {
        self.max_size > 0 && self.max_size < size
    }

    fn backup_file_name(&self) -> PathBuf {
        let timestamp = self.naming.label(self.naming.now(), FILE_TIME_FORMAT);
        self.backup_with_label(&timestamp)
    }

    fn mark_rotated(&self) {
        *self.rotated.lock() = self.naming.label(self.naming.now(), FILE_TIME_FORMAT);
    }

    fn outdated_files(&self) -> Vec<PathBuf> {
        let mut files = glob_files(&self.backup_pattern());
        files.sort();

        let mut outdated = BTreeSet::new();

        // Too many backups
        if self.max_backups > 0 && files.len() > self.max_backups {
            let excess = files.len() - self.max_backups;
            outdated.extend(files.drain(..excess));
        }

        // Too old backups
        let boundary = match self.keep_days {
            0 => None,
            days => self
                .naming
                .now()
                .checked_sub_signed(Duration::hours(24 * i64::from(days))),
        };
        if let Some(boundary) = boundary {
            let mut boundary_file = self
                .backup_with_label(&self.naming.label(boundary, FILE_TIME_FORMAT))
                .into_os_string();
            if self.naming.gzip {
                boundary_file.push(GZIP_EXT);
            }

            for file in files {
                if file.as_os_str() >= boundary_file.as_os_str() {
                    break;
                }
                outdated.insert(file);
            }
        }

        outdated.into_iter().collect()
    }
}
