//! Calendar-based rotation: one backup per day or per hour.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;

use super::{DATE_FORMAT, GZIP_EXT, HOUR_FORMAT, Naming, RotationRule, glob_files};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy)]
enum Period {
    Day,
    Hour,
}

impl Period {
    const fn format(self) -> &'static str {
        match self {
            Self::Day => DATE_FORMAT,
            Self::Hour => HOUR_FORMAT,
        }
    }

    fn window(self, count: u32) -> Duration {
        match self {
            Self::Day => Duration::hours(24 * i64::from(count)),
            Self::Hour => Duration::hours(i64::from(count)),
        }
    }
}

/// State shared by the daily and hourly rules.
#[derive(Debug)]
struct PeriodicRule {
    naming: Naming,
    period: Period,
    /// Retention in periods; 0 keeps backups forever.
    keep: u32,
    rotated: Mutex<String>,
}

impl PeriodicRule {
    fn new(naming: Naming, period: Period, keep: u32) -> Self {
        let rotated = naming.label(naming.now(), period.format());
        Self {
            naming,
            period,
            keep,
            rotated: Mutex::new(rotated),
        }
    }

    fn current_label(&self) -> String {
        self.naming.label(self.naming.now(), self.period.format())
    }

    fn backup_file_name(&self) -> PathBuf {
        self.naming.suffixed(&self.current_label())
    }

    fn mark_rotated(&self) {
        *self.rotated.lock() = self.current_label();
    }

    fn shall_rotate(&self) -> bool {
        let rotated = self.rotated.lock();
        !rotated.is_empty() && *rotated != self.current_label()
    }

    fn outdated_files(&self) -> Vec<PathBuf> {
        if self.keep == 0 {
            return Vec::new();
        }

        // A window reaching past the calendar's start keeps everything
        let Some(boundary) = self
            .naming
            .now()
            .checked_sub_signed(self.period.window(self.keep))
        else {
            return Vec::new();
        };

        let files = glob_files(&self.naming.backup_pattern());

        let mut suffix = self.naming.label(boundary, self.period.format());
        if self.naming.gzip {
            suffix.push_str(GZIP_EXT);
        }
        let boundary_file = self.naming.suffixed(&suffix);

        files
            .into_iter()
            .filter(|file| file.as_os_str() < boundary_file.as_os_str())
            .collect()
    }

    fn last_rotation(&self) -> String {
        self.rotated.lock().clone()
    }
}

/// Rotates the log file once per calendar day.
///
/// Backups are named `{filename}{delimiter}{YYYY-MM-DD}`.
#[derive(Debug)]
pub struct DailyRotationRule {
    inner: PeriodicRule,
}

impl DailyRotationRule {
    /// Create a daily rule keeping backups for `keep_days` days (0 keeps them
    /// forever).
    pub fn new(
        filename: impl Into<PathBuf>,
        delimiter: impl Into<String>,
        keep_days: u32,
        gzip: bool,
    ) -> Self {
        Self::with_clock(filename, delimiter, keep_days, gzip, Arc::new(SystemClock))
    }

    /// Same as [`DailyRotationRule::new`] with an explicit time source.
    pub fn with_clock(
        filename: impl Into<PathBuf>,
        delimiter: impl Into<String>,
        keep_days: u32,
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
        Self {
            inner: PeriodicRule::new(naming, Period::Day, keep_days),
        }
    }

    /// Render labels in the local time zone instead of UTC.
    #[must_use]
    pub fn local_time(mut self, local_time: bool) -> Self {
        self.inner.naming.local_time = local_time;
        self.inner = PeriodicRule::new(self.inner.naming, Period::Day, self.inner.keep);
        self
    }

    /// Label of the day the last rotation happened in.
    pub fn last_rotation(&self) -> String {
        self.inner.last_rotation()
    }
}

impl RotationRule for DailyRotationRule {
    fn shall_rotate(&self, _size: u64) -> bool {
        self.inner.shall_rotate()
    }

    fn backup_file_name(&self) -> PathBuf {
        self.inner.backup_file_name()
    }

    fn mark_rotated(&self) {
        self.inner.mark_rotated();
    }

    fn outdated_files(&self) -> Vec<PathBuf> {
        self.inner.outdated_files()
    }
}

/// Rotates the log file once per hour.
///
/// Backups are named `{filename}{delimiter}{YYYY-MM-DD-HH}`.
#[derive(Debug)]
pub struct HourlyRotationRule {
    inner: PeriodicRule,
}

impl HourlyRotationRule {
    /// Create an hourly rule keeping backups for `keep_hours` hours (0 keeps
    /// them forever).
    pub fn new(
        filename: impl Into<PathBuf>,
        delimiter: impl Into<String>,
        keep_hours: u32,
        gzip: bool,
    ) -> Self {
        Self::with_clock(filename, delimiter, keep_hours, gzip, Arc::new(SystemClock))
    }

    /// Same as [`HourlyRotationRule::new`] with an explicit time source.
    pub fn with_clock(
        filename: impl Into<PathBuf>,
        delimiter: impl Into<String>,
        keep_hours: u32,
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
        Self {
            inner: PeriodicRule::new(naming, Period::Hour, keep_hours),
        }
    }

    /// Render labels in the local time zone instead of UTC.
    #[must_use]
    pub fn local_time(mut self, local_time: bool) -> Self {
        self.inner.naming.local_time = local_time;
        self.inner = PeriodicRule::new(self.inner.naming, Period::Hour, self.inner.keep);
        self
    }

    /// Label of the hour the last rotation happened in.
    pub fn last_rotation(&self) -> String {
        self.inner.last_rotation()
    }
}

impl RotationRule for HourlyRotationRule {
    fn shall_rotate(&self, _size: u64) -> bool {
        self.inner.shall_rotate()
    }

    fn backup_file_name(&self) -> PathBuf {
        self.inner.backup_file_name()
    }

    fn mark_rotated(&self) {
        self.inner.mark_rotated();
    }

    fn outdated_files(&self) -> Vec<PathBuf> {
        self.inner.outdated_files()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn clock_at(y: i32, m: u32, d: u32, h: u32) -> Arc<MockClock> {
        Arc::new(MockClock::new(Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap()))
    }

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_daily_rotates_only_when_day_changes() {
        let clock = clock_at(2024, 1, 1, 10);
        let rule = DailyRotationRule::with_clock("/tmp/app.log", "-", 0, false, clock.clone());

        assert!(!rule.shall_rotate(u64::MAX));

        clock.advance(Duration::hours(14));
        assert!(rule.shall_rotate(0));

        rule.mark_rotated();
        assert_eq!(rule.last_rotation(), "2024-01-02");
        assert!(!rule.shall_rotate(0));
    }

    #[test]
    fn test_daily_backup_names_increase_across_days() {
        let clock = clock_at(2024, 1, 31, 12);
        let rule = DailyRotationRule::with_clock("/tmp/app.log", "-", 0, false, clock.clone());

        let first = rule.backup_file_name();
        clock.advance(Duration::days(1));
        let second = rule.backup_file_name();

        assert_eq!(first, PathBuf::from("/tmp/app.log-2024-01-31"));
        assert_eq!(second, PathBuf::from("/tmp/app.log-2024-02-01"));
        assert!(first < second);
        // Stable when computed twice
        assert_eq!(rule.backup_file_name(), second);
    }

    #[test]
    fn test_hourly_rotates_only_when_hour_changes() {
        let clock = clock_at(2024, 1, 1, 10);
        let rule = HourlyRotationRule::with_clock("/tmp/app.log", "-", 0, false, clock.clone());

        clock.advance(Duration::minutes(20));
        assert!(!rule.shall_rotate(0));

        clock.advance(Duration::minutes(20));
        assert!(rule.shall_rotate(0));
        assert_eq!(rule.backup_file_name(), PathBuf::from("/tmp/app.log-2024-01-01-11"));

        rule.mark_rotated();
        assert_eq!(rule.last_rotation(), "2024-01-01-11");
        assert!(!rule.shall_rotate(0));
    }

    #[test]
    fn test_daily_outdated_files_respect_retention() {
        let dir = TempDir::new().unwrap();
        let filename = dir.path().join("app.log");
        let old1 = touch(&dir, "app.log-2024-01-01");
        let old2 = touch(&dir, "app.log-2024-01-06");
        touch(&dir, "app.log-2024-01-07");
        touch(&dir, "app.log-2024-01-09");
        touch(&dir, "app.log");

        let clock = clock_at(2024, 1, 10, 8);
        let rule = DailyRotationRule::with_clock(&filename, "-", 3, false, clock);

        let mut outdated = rule.outdated_files();
        outdated.sort();
        assert_eq!(outdated, vec![old1, old2]);
    }

    #[test]
    fn test_zero_retention_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let filename = dir.path().join("app.log");
        touch(&dir, "app.log-2000-01-01");

        let clock = clock_at(2024, 1, 10, 8);
        let rule = DailyRotationRule::with_clock(&filename, "-", 0, false, clock);

        assert!(rule.outdated_files().is_empty());
    }

    #[test]
    fn test_gzip_retention_only_sees_compressed_backups() {
        let dir = TempDir::new().unwrap();
        let filename = dir.path().join("app.log");
        // Still waiting for its compression task
        touch(&dir, "app.log-2024-01-01");
        let compressed = touch(&dir, "app.log-2024-01-02.gz");

        let clock = clock_at(2024, 1, 10, 8);
        let rule = DailyRotationRule::with_clock(&filename, "-", 1, true, clock);

        assert_eq!(rule.outdated_files(), vec![compressed]);
    }

    #[test]
    fn test_hourly_outdated_files_respect_retention() {
        let dir = TempDir::new().unwrap();
        let filename = dir.path().join("svc.log");
        let old = touch(&dir, "svc.log_2024-01-10-03");
        touch(&dir, "svc.log_2024-01-10-05");
        touch(&dir, "svc.log_2024-01-10-07");

        let clock = clock_at(2024, 1, 10, 8);
        let rule = HourlyRotationRule::with_clock(&filename, "_", 4, false, clock);

        assert_eq!(rule.outdated_files(), vec![old]);
    }

    #[test]
    fn test_retention_beyond_calendar_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let filename = dir.path().join("app.log");
        touch(&dir, "app.log-2000-01-01");
        touch(&dir, "app.log-2000-01-01-00");

        let clock = clock_at(2024, 1, 10, 8);
        let daily =
            DailyRotationRule::with_clock(&filename, "-", 200_000_000, false, clock.clone());
        let hourly = HourlyRotationRule::with_clock(&filename, "-", u32::MAX, false, clock);

        assert!(daily.outdated_files().is_empty());
        assert!(hourly.outdated_files().is_empty());
    }
}
