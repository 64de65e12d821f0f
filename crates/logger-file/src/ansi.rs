//! Writer adapter that removes terminal colour codes.

use std::io::{self, Write};

/// Strips ANSI escape sequences before forwarding bytes to `W`.
///
/// Lets a colourised console formatter share its output with a log file
/// without the escape codes ending up on disk. Reports the full input length
/// as written so callers never retry bytes that were stripped on purpose.
#[derive(Debug, Clone)]
pub struct StripAnsi<W> {
    inner: W,
}

impl<W: Write> StripAnsi<W> {
    /// Wrap `inner`.
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StripAnsi<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stripped = strip_ansi_escapes::strip(buf);
        self.inner.write_all(&stripped)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
