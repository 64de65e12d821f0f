//! Rotating, buffered file writer for log output
//!
//! This crate persists already-encoded log records to disk without putting
//! file I/O on the caller's path:
//! - Writes are staged in pooled buffers and handed to a single worker thread
//! - Files rotate by size, per day or per hour
//! - Rotated backups are optionally gzipped and pruned by age or count
//! - `Sync` and `Close` guarantee that everything written before them is on
//!   disk
//!
//! [`RotatingWriter`] implements [`std::io::Write`] and
//! [`tracing_subscriber::fmt::MakeWriter`], so it can serve directly as the
//! sink of a `tracing_subscriber::fmt` layer.

#![warn(missing_docs, unreachable_pub)]
#![forbid(unsafe_code)]

mod ansi;
mod arena;
mod clock;
mod config;
mod error;
mod fs;
mod maintenance;
pub mod rule;
mod sink;
mod writer;

pub use ansi::StripAnsi;
pub use arena::{BufferArena, PooledBuffer};
pub use clock::{AdvancingClock, Clock, MockClock, SystemClock};
pub use config::{FileLoggerConfig, FileLoggerConfigBuilder, RotationPolicy};
pub use error::{Error, Result};
pub use fs::{FileSystem, StandardFileSystem};
pub use rule::{DailyRotationRule, HourlyRotationRule, RotationRule, SizeLimitRotationRule};
pub use writer::{RotatingWriter, RotatingWriterBuilder};
