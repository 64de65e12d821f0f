//! Filesystem access used by backup maintenance.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Filesystem operations needed to compress and prune backups.
///
/// Abstracted so the maintenance path can be exercised without touching the
/// disk.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Open a file for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create (or truncate) a file for writing.
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Remove a file.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Stream everything from `reader` into `writer`.
    fn copy(&self, writer: &mut dyn Write, reader: &mut dyn Read) -> io::Result<u64> {
        io::copy(reader, writer)
    }

    /// Flush and release a writer obtained from [`FileSystem::create`].
    fn close(&self, writer: Box<dyn Write + Send>) -> io::Result<()>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardFileSystem;

impl FileSystem for StandardFileSystem {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(File::create(path)?))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn close(&self, mut writer: Box<dyn Write + Send>) -> io::Result<()> {
        writer.flush()
    }
}
