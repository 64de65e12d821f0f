//! The active log file and its rotation, owned by the background worker.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::maintenance::Maintenance;
use crate::rule::RotationRule;

/// Active file state. Only the worker thread ever holds this, so none of it
/// needs synchronisation.
///
/// At most one handle is open at a time; rotation is close, rename, create.
#[derive(Debug)]
pub(crate) struct FileSink {
    path: PathBuf,
    /// Name the active file gets on the next rotation.
    backup: Option<PathBuf>,
    /// `None` only while degraded: the active file could not be (re)opened.
    file: Option<File>,
    /// Bytes in the active file since it was opened or rotated.
    current_size: u64,
    rule: Arc<dyn RotationRule>,
    maintenance: Maintenance,
    tasks: Vec<JoinHandle<()>>,
}

impl FileSink {
    /// Open `path` for appending, creating it and its directory if needed.
    pub(crate) fn open(
        path: PathBuf,
        rule: Arc<dyn RotationRule>,
        maintenance: Maintenance,
    ) -> Result<Self> {
        let backup = Some(rule.backup_file_name());

        let (file, current_size) = match fs::metadata(&path) {
            Ok(metadata) => {
                let file = OpenOptions::new()
                    .append(true)
                    .open(&path)
                    .map_err(|e| open_error(&path, e))?;
                (file, metadata.len())
            }
            Err(_) => {
                if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                    fs::create_dir_all(dir).map_err(|e| Error::CreateDirectory {
                        path: dir.to_path_buf(),
                        source: Arc::new(e),
                    })?;
                }
                let file = File::create(&path).map_err(|e| open_error(&path, e))?;
                (file, 0)
            }
        };

        Ok(Self {
            path,
            backup,
            file: Some(file),
            current_size,
            rule,
            maintenance,
            tasks: Vec::new(),
        })
    }

    /// Write `buffer`, rotating first if the rule asks for it.
    ///
    /// A failed rotation is logged and the bytes go to the current file; the
    /// next qualifying write retries the rotation. Returns 0 without error
    /// when no file could be opened at all.
    pub(crate) fn write_buffer(&mut self, buffer: &[u8]) -> Result<usize> {
        let prospective = self.current_size + buffer.len() as u64;
        if self.rule.shall_rotate(prospective) {
            match self.rotate() {
                Ok(()) => {
                    self.rule.mark_rotated();
                    self.current_size = 0;
                }
                Err(e) => {
                    error!(file = %self.path.display(), error = %e, "log rotation failed");
                    self.reopen();
                }
            }
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        file.write_all(buffer)?;
        self.current_size += buffer.len() as u64;
        Ok(buffer.len())
    }

    /// Flush the active file to disk.
    pub(crate) fn sync(&self) -> Result<()> {
        if let Some(file) = &self.file {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Final close: sync and release the handle, then wait for maintenance
    /// tasks still running.
    pub(crate) fn close(mut self) -> Result<()> {
        let result = self.close_file();
        for task in self.tasks.drain(..) {
            if task.join().is_err() {
                error!("log maintenance task panicked");
            }
        }
        result
    }

    #[cfg(test)]
    pub(crate) const fn current_size(&self) -> u64 {
        self.current_size
    }

    #[cfg(test)]
    pub(crate) fn pending_backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    fn rotate(&mut self) -> Result<()> {
        self.close_file()?;

        if fs::metadata(&self.path).is_ok() {
            if let Some(backup) = &self.backup {
                fs::rename(&self.path, backup).map_err(|e| Error::rotation(&self.path, e))?;
                debug!(
                    file = %self.path.display(),
                    backup = %backup.display(),
                    "rotated log file"
                );
                let backup = backup.clone();
                self.post_rotate(backup);
            }
        }

        self.backup = Some(self.rule.backup_file_name());
        let file = File::create(&self.path).map_err(|e| Error::rotation(&self.path, e))?;
        self.file = Some(file);
        Ok(())
    }

    fn post_rotate(&mut self, backup: PathBuf) {
        self.tasks.retain(|task| !task.is_finished());
        if let Some(task) = self.maintenance.spawn(backup) {
            self.tasks.push(task);
        }
    }

    fn close_file(&mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => file.sync_all().map_err(|e| Error::rotation(&self.path, e)),
            None => Ok(()),
        }
    }

    /// After a failed rotation, get a handle on the active path again so the
    /// pending bytes are not lost.
    fn reopen(&mut self) {
        if self.file.is_some() {
            return;
        }
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => self.file = Some(file),
            Err(e) => warn!(
                file = %self.path.display(),
                error = %e,
                "log file unavailable, dropping writes until the next rotation"
            ),
        }
    }
}

fn open_error(path: &Path, source: std::io::Error) -> Error {
    Error::OpenFile {
        path: path.to_path_buf(),
        source: Arc::new(source),
    }
}
