//! Rotation policies.
//!
//! A rule decides when the active file is archived, what the archive is
//! called and which archives have become stale. Rules only touch the
//! filesystem to glob for existing backups.
//!
//! Backup labels are fixed-width and zero-padded, so comparing backup paths
//! as strings orders them chronologically. Retention checks rely on this.
//! Changing the delimiter or label format between restarts leaves backups in
//! the old format invisible to the sweep.

mod periodic;
mod size;

pub use periodic::{DailyRotationRule, HourlyRotationRule};
pub use size::SizeLimitRotationRule;

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tracing::warn;

use crate::clock::Clock;

/// Extension appended to compressed backups
pub const GZIP_EXT: &str = ".gz";

/// Label format of daily backups
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Label format of hourly backups
pub(crate) const HOUR_FORMAT: &str = "%Y-%m-%d-%H";

/// Label format of size-limited backups
pub(crate) const FILE_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// A policy deciding when and how the active log file is rotated.
///
/// All methods take `&self`: the worker owns the only mutating caller
/// (`mark_rotated`) while maintenance tasks read `outdated_files` from other
/// threads.
pub trait RotationRule: Send + Sync + fmt::Debug {
    /// Whether the active file must be rotated before it grows to `size`
    /// bytes.
    fn shall_rotate(&self, size: u64) -> bool;

    /// Name the active file will be renamed to on the next rotation.
    fn backup_file_name(&self) -> PathBuf;

    /// Record that a rotation just succeeded.
    fn mark_rotated(&self);

    /// Backups that exceed the retention window or backup count.
    fn outdated_files(&self) -> Vec<PathBuf>;
}

/// How a rule renders labels and finds its backups on disk.
#[derive(Clone)]
pub(crate) struct Naming {
    pub(crate) filename: PathBuf,
    pub(crate) delimiter: String,
    pub(crate) gzip: bool,
    pub(crate) local_time: bool,
    pub(crate) clock: Arc<dyn Clock>,
}

impl fmt::Debug for Naming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Naming")
            .field("filename", &self.filename)
            .field("delimiter", &self.delimiter)
            .field("gzip", &self.gzip)
            .field("local_time", &self.local_time)
            .finish_non_exhaustive()
    }
}

impl Naming {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn label(&self, at: DateTime<Utc>, format: &str) -> String {
        if self.local_time {
            at.with_timezone(&Local).format(format).to_string()
        } else {
            at.format(format).to_string()
        }
    }

    /// `{filename}{delimiter}{suffix}`
    pub(crate) fn suffixed(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.filename.as_os_str());
        name.push(&self.delimiter);
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Glob pattern matching every backup of `filename`; only compressed
    /// ones when compression is on.
    pub(crate) fn backup_pattern(&self) -> String {
        let mut pattern = glob::Pattern::escape(&self.suffixed("").to_string_lossy());
        pattern.push('*');
        if self.gzip {
            pattern.push_str(GZIP_EXT);
        }
        pattern
    }
}

/// Append `.gz` to `path`.
pub(crate) fn gzip_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(GZIP_EXT);
    PathBuf::from(name)
}

/// Expand `pattern`, logging and skipping entries that cannot be read.
pub(crate) fn glob_files(pattern: &str) -> Vec<PathBuf> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(%pattern, error = %e, "failed to find outdated log files");
            return Vec::new();
        }
    };

    paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(%pattern, error = %e, "skipping unreadable log file");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::TimeZone;

    fn naming(gzip: bool) -> Naming {
        Naming {
            filename: PathBuf::from("/var/log/app [1].log"),
            delimiter: "-".to_string(),
            gzip,
            local_time: false,
            clock: Arc::new(MockClock::new(
                Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap(),
            )),
        }
    }

    #[test]
    fn test_labels_are_zero_padded() {
        let naming = naming(false);
        let now = naming.now();
        assert_eq!(naming.label(now, DATE_FORMAT), "2024-03-05");
        assert_eq!(naming.label(now, HOUR_FORMAT), "2024-03-05-07");
        assert_eq!(naming.label(now, FILE_TIME_FORMAT), "2024-03-05T07-08-09.000");
    }

    #[test]
    fn test_backup_pattern_escapes_filename() {
        assert_eq!(naming(false).backup_pattern(), "/var/log/app [[]1[]].log-*");
        assert_eq!(naming(true).backup_pattern(), "/var/log/app [[]1[]].log-*.gz");
    }

    #[test]
    fn test_gzip_path_appends_extension() {
        assert_eq!(
            gzip_path(Path::new("/tmp/app.log-2024-01-01")),
            PathBuf::from("/tmp/app.log-2024-01-01.gz")
        );
    }
}
