//! Post-rotation maintenance: compress the fresh backup, prune stale ones.
//!
//! Runs on its own short-lived thread per rotation and only ever touches
//! files that are already rotated and closed. Failures are logged and never
//! reach the writer.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};

use crate::fs::FileSystem;
use crate::rule::{RotationRule, gzip_path};

/// Everything a maintenance task needs, cheap to clone onto a new thread.
#[derive(Clone, Debug)]
pub(crate) struct Maintenance {
    rule: Arc<dyn RotationRule>,
    fs: Arc<dyn FileSystem>,
    compress: bool,
}

impl Maintenance {
    pub(crate) fn new(rule: Arc<dyn RotationRule>, fs: Arc<dyn FileSystem>, compress: bool) -> Self {
        Self { rule, fs, compress }
    }

    /// Start maintenance for a freshly rotated `backup`.
    pub(crate) fn spawn(&self, backup: PathBuf) -> Option<JoinHandle<()>> {
        let task = self.clone();
        let spawned = thread::Builder::new()
            .name("log-maintenance".to_string())
            .spawn(move || task.run(&backup));

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn log maintenance task");
                None
            }
        }
    }

    pub(crate) fn run(&self, backup: &Path) {
        if self.compress {
            self.compress_backup(backup);
        }
        self.remove_outdated();
    }

    fn compress_backup(&self, backup: &Path) {
        let start = Instant::now();
        info!(file = %backup.display(), "compressing log file");

        match gzip_file(backup, self.fs.as_ref()) {
            Ok(()) => info!(
                file = %backup.display(),
                took = ?start.elapsed(),
                "compressed log file"
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = %backup.display(), "backup vanished before compression");
            }
            Err(e) => warn!(file = %backup.display(), error = %e, "compress error"),
        }
    }

    fn remove_outdated(&self) {
        for file in self.rule.outdated_files() {
            match self.fs.remove(&file) {
                Ok(()) => debug!(file = %file.display(), "removed outdated log file"),
                Err(e) => warn!(
                    file = %file.display(),
                    error = %e,
                    "failed to remove outdated log file"
                ),
            }
        }
    }
}

/// Compress `file` into `{file}.gz`, removing the original only when every
/// step succeeded.
pub(crate) fn gzip_file(file: &Path, fs: &dyn FileSystem) -> io::Result<()> {
    let mut input = fs.open(file)?;
    let target = gzip_path(file);
    let output = fs.create(&target)?;

    let result = (|| {
        let mut encoder = GzEncoder::new(output, Compression::default());
        fs.copy(&mut encoder, input.as_mut())?;
        let output = encoder.finish()?;
        fs.close(output)
    })();
    drop(input);

    match result {
        Ok(()) => fs.remove(file),
        Err(e) => {
            if let Err(cleanup) = fs.remove(&target) {
                debug!(file = %target.display(), error = %cleanup, "failed to remove partial archive");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::{Read, Write};

    type Files = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

    /// In-memory filesystem with switchable failures.
    #[derive(Debug, Default)]
    struct MemoryFileSystem {
        files: Files,
        fail_copy: bool,
        /// Paths whose removal is refused
        read_only: Vec<PathBuf>,
    }

    impl MemoryFileSystem {
        fn with_file(path: &str, data: &[u8]) -> Self {
            let fs = Self::default();
            fs.files.lock().insert(PathBuf::from(path), data.to_vec());
            fs
        }

        fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().get(Path::new(path)).cloned()
        }
    }

    /// Buffers writes and publishes them on close.
    struct MemoryFile {
        path: PathBuf,
        data: Vec<u8>,
        files: Files,
    }

    impl Write for MemoryFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.files
                .lock()
                .insert(self.path.clone(), self.data.clone());
            Ok(())
        }
    }

    impl FileSystem for MemoryFileSystem {
        fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            match self.files.lock().get(path) {
                Some(data) => Ok(Box::new(io::Cursor::new(data.clone()))),
                None => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
            }
        }

        fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
            self.files.lock().insert(path.to_path_buf(), Vec::new());
            Ok(Box::new(MemoryFile {
                path: path.to_path_buf(),
                data: Vec::new(),
                files: Arc::clone(&self.files),
            }))
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            if self.read_only.iter().any(|locked| locked == path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.files
                .lock()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }

        fn copy(&self, writer: &mut dyn Write, reader: &mut dyn Read) -> io::Result<u64> {
            if self.fail_copy {
                return Err(io::Error::other("disk full"));
            }
            io::copy(reader, writer)
        }

        fn close(&self, mut writer: Box<dyn Write + Send>) -> io::Result<()> {
            writer.flush()
        }
    }

    #[derive(Debug)]
    struct FixedRule(Vec<PathBuf>);

    impl RotationRule for FixedRule {
        fn shall_rotate(&self, _size: u64) -> bool {
            false
        }

        fn backup_file_name(&self) -> PathBuf {
            PathBuf::from("/logs/app.log-next")
        }

        fn mark_rotated(&self) {}

        fn outdated_files(&self) -> Vec<PathBuf> {
            self.0.clone()
        }
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_gzip_replaces_original() {
        let fs = MemoryFileSystem::with_file("/logs/app.log-1", b"line one\nline two\n");

        gzip_file(Path::new("/logs/app.log-1"), &fs).unwrap();

        assert!(fs.get("/logs/app.log-1").is_none());
        let compressed = fs.get("/logs/app.log-1.gz").unwrap();
        assert_eq!(gunzip(&compressed), b"line one\nline two\n");
    }

    #[test]
    fn test_failed_copy_keeps_original() {
        let mut fs = MemoryFileSystem::with_file("/logs/app.log-1", b"precious");
        fs.fail_copy = true;

        let err = gzip_file(Path::new("/logs/app.log-1"), &fs).unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert_eq!(fs.get("/logs/app.log-1").unwrap(), b"precious");
        assert!(fs.get("/logs/app.log-1.gz").is_none());
    }

    #[test]
    fn test_missing_backup_is_not_found() {
        let fs = MemoryFileSystem::default();
        let err = gzip_file(Path::new("/logs/gone"), &fs).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_run_compresses_then_prunes() {
        let fs = Arc::new(MemoryFileSystem::with_file("/logs/app.log-3", b"fresh"));
        fs.files
            .lock()
            .insert(PathBuf::from("/logs/app.log-1.gz"), b"old".to_vec());
        let rule = Arc::new(FixedRule(vec![PathBuf::from("/logs/app.log-1.gz")]));

        let maintenance = Maintenance::new(rule, fs.clone(), true);
        maintenance.run(Path::new("/logs/app.log-3"));

        assert!(fs.get("/logs/app.log-1.gz").is_none());
        assert!(fs.get("/logs/app.log-3").is_none());
        assert_eq!(gunzip(&fs.get("/logs/app.log-3.gz").unwrap()), b"fresh");
    }

    #[test]
    fn test_failed_removal_does_not_stop_sweep() {
        let mut fs = MemoryFileSystem::with_file("/logs/app.log-0", b"locked");
        fs.files
            .lock()
            .insert(PathBuf::from("/logs/app.log-1"), b"stale".to_vec());
        fs.read_only.push(PathBuf::from("/logs/app.log-0"));
        let fs = Arc::new(fs);
        let rule = Arc::new(FixedRule(vec![
            PathBuf::from("/logs/app.log-0"),
            PathBuf::from("/logs/app.log-1"),
        ]));

        let maintenance = Maintenance::new(rule, fs.clone(), false);
        let handle = maintenance.spawn(PathBuf::from("/logs/app.log-2")).unwrap();
        handle.join().unwrap();

        assert_eq!(fs.get("/logs/app.log-0").unwrap(), b"locked");
        assert!(fs.get("/logs/app.log-1").is_none());
    }
}
