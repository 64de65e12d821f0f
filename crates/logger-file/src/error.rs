//! Error types for file-based logging

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Result type for file logger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during file logging
///
/// I/O sources are shared behind an `Arc` so the error can be cloned; `close`
/// hands the same outcome to every caller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Failed to create log directory
    #[error("Failed to create log directory at {path}: {source}")]
    CreateDirectory {
        /// The path that failed to be created
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Arc<io::Error>,
    },

    /// Failed to open or create the active log file
    #[error("Failed to open log file at {path}: {source}")]
    OpenFile {
        /// The file that could not be opened
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Arc<io::Error>,
    },

    /// Failed to rotate log file
    #[error("Failed to rotate log file {path}: {source}")]
    Rotation {
        /// The file being operated on when rotation failed
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Arc<io::Error>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The writer has been closed
    #[error("log writer is closed")]
    Closed,

    /// No staging buffer could be acquired; the write was dropped
    #[error("log buffer capacity exhausted")]
    BufferExhausted,

    /// The background worker panicked before finishing its shutdown
    #[error("log writer worker panicked")]
    WorkerPanicked,

    /// The background worker thread could not be started
    #[error("Failed to spawn log writer worker: {0}")]
    Spawn(#[source] Arc<io::Error>),
}

impl Error {
    pub(crate) fn rotation(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Rotation {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match error {
            Error::Closed => io::ErrorKind::BrokenPipe,
            Error::BufferExhausted => io::ErrorKind::WouldBlock,
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, error)
    }
}
