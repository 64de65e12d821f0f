//! The rotating, buffered file writer.
//!
//! Callers append to a shared staging buffer under a short lock. Once the
//! buffer crosses the flush threshold it is detached and handed to a single
//! worker thread over a bounded channel; that worker is the only code that
//! touches the file. A full channel blocks the handing-off caller, which is
//! the writer's backpressure.

use std::cell::Cell;
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::{debug, error, info};
use tracing_subscriber::fmt::MakeWriter;

use crate::arena::{BufferArena, PooledBuffer};
use crate::clock::{Clock, SystemClock};
use crate::config::FileLoggerConfig;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, StandardFileSystem};
use crate::maintenance::Maintenance;
use crate::rule::RotationRule;
use crate::sink::FileSink;

thread_local! {
    /// Set on the worker thread. Diagnostics the worker emits may come back
    /// into this writer through the tracing subscriber; they must not wait on
    /// the worker itself.
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

fn in_worker() -> bool {
    IN_WORKER.with(Cell::get)
}

/// Requests from callers to the worker, outside the data path
#[derive(Debug)]
enum Control {
    Sync(Sender<Result<()>>),
    Shutdown,
}

#[derive(Debug, Default)]
struct StagingState {
    current: Option<PooledBuffer>,
    closed: bool,
}

/// State shared by callers and the worker.
#[derive(Debug)]
struct Staging {
    state: Mutex<StagingState>,
    arena: Arc<BufferArena>,
}

/// A log sink that appends to a file and rotates it according to a
/// [`RotationRule`].
///
/// Handles are cheap to clone and share one worker. The writer is closed
/// when [`RotatingWriter::close`] is called or the last handle is dropped.
///
/// ```no_run
/// use logger_file::{FileLoggerConfig, RotatingWriter, RotationPolicy};
///
/// let config = FileLoggerConfig::builder("/var/log/node/node.log")
///     .rotation(RotationPolicy::Daily { keep_days: 7 })
///     .compress(true)
///     .build()?;
/// let writer = RotatingWriter::new(config)?;
///
/// writer.write(b"hello\n")?;
/// writer.close()?;
/// # Ok::<(), logger_file::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct RotatingWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    staging: Arc<Staging>,
    flush_threshold: usize,
    handoff: Sender<PooledBuffer>,
    control: Sender<Control>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
    closed: OnceLock<Result<()>>,
}

impl RotatingWriter {
    /// Open the configured file and start the worker.
    pub fn new(config: FileLoggerConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Customise collaborators before starting the writer.
    pub fn builder(config: FileLoggerConfig) -> RotatingWriterBuilder {
        RotatingWriterBuilder::new(config)
    }

    /// Append `bytes` to the log.
    ///
    /// Returns once the bytes are staged, not once they are on disk. Blocks
    /// only when a full buffer has to be handed to a worker that is already
    /// behind. Fails with [`Error::BufferExhausted`] when no staging buffer is
    /// available; the record is dropped in that case.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        self.shared.write(bytes)
    }

    /// Block until everything written before this call is on disk.
    pub fn sync(&self) -> Result<()> {
        self.shared.sync()
    }

    /// Drain pending writes, close the file and stop the worker.
    ///
    /// Every call returns the outcome of the first one.
    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }
}

impl Shared {
    fn write(&self, bytes: &[u8]) -> Result<usize> {
        let on_worker = in_worker();
        let mut state = if on_worker {
            // A caller may hold the lock while it waits for the worker to make
            // room in the channel.
            self.staging
                .state
                .try_lock()
                .ok_or(Error::BufferExhausted)?
        } else {
            self.staging.state.lock()
        };
        if state.closed {
            return Err(Error::Closed);
        }

        if state.current.is_none() {
            state.current = Some(self.staging.arena.acquire().ok_or(Error::BufferExhausted)?);
        }
        let Some(buffer) = state.current.as_mut() else {
            return Err(Error::BufferExhausted);
        };
        buffer.extend_from_slice(bytes);

        // The worker cannot hand off to itself; its own records wait for the
        // next flush.
        if buffer.len() > self.flush_threshold && !on_worker {
            if let Some(full) = state.current.take() {
                // Sent under the lock: a detached buffer is always queued
                // before anyone else can stage or sync.
                self.handoff.send(full).map_err(|_| Error::Closed)?;
            }
        }

        Ok(bytes.len())
    }

    fn sync(&self) -> Result<()> {
        if self.staging.state.lock().closed {
            return Err(Error::Closed);
        }
        if in_worker() {
            return Ok(());
        }

        let (reply, done) = channel::bounded(1);
        self.control
            .send(Control::Sync(reply))
            .map_err(|_| Error::Closed)?;
        done.recv().map_err(|_| Error::Closed)?
    }

    fn close(&self) -> Result<()> {
        self.closed.get_or_init(|| self.shutdown()).clone()
    }

    fn shutdown(&self) -> Result<()> {
        self.staging.state.lock().closed = true;
        // The worker only disappears early if it panicked; join reports that.
        let _ = self.control.send(Control::Shutdown);

        if in_worker() {
            return Ok(());
        }

        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(result) => result,
            Err(_) => Err(Error::WorkerPanicked),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if self.closed.get().is_none() {
            if let Err(e) = self.close() {
                error!(error = %e, "failed to close log writer");
            }
        }
    }
}

/// Builder for [`RotatingWriter`] with injectable collaborators.
#[derive(Debug)]
pub struct RotatingWriterBuilder {
    config: FileLoggerConfig,
    clock: Arc<dyn Clock>,
    file_system: Arc<dyn FileSystem>,
    arena: Option<Arc<BufferArena>>,
    rule: Option<Arc<dyn RotationRule>>,
}

impl RotatingWriterBuilder {
    fn new(config: FileLoggerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            file_system: Arc::new(StandardFileSystem),
            arena: None,
            rule: None,
        }
    }

    /// Time source for the rotation rule built from the configuration
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Filesystem used to compress and prune backups
    #[must_use]
    pub fn file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    /// Share a buffer arena between writers instead of creating one
    #[must_use]
    pub fn arena(mut self, arena: Arc<BufferArena>) -> Self {
        self.arena = Some(arena);
        self
    }

    /// Use a custom rotation rule instead of the configured policy
    #[must_use]
    pub fn rule(mut self, rule: Arc<dyn RotationRule>) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Open the active file and start the worker thread.
    pub fn build(self) -> Result<RotatingWriter> {
        let Self {
            config,
            clock,
            file_system,
            arena,
            rule,
        } = self;
        config.validate()?;

        let rule = rule.unwrap_or_else(|| {
            config.rotation.build_rule(
                &config.path,
                &config.delimiter,
                config.compress,
                config.local_time,
                clock,
            )
        });
        let arena = arena.unwrap_or_else(|| BufferArena::new(config.buffer_capacity));

        let maintenance = Maintenance::new(rule.clone(), file_system, config.compress);
        let sink = FileSink::open(config.path.clone(), rule, maintenance)?;

        let staging = Arc::new(Staging {
            state: Mutex::new(StagingState::default()),
            arena,
        });
        let (handoff, handoff_rx) = channel::bounded(config.handoff_capacity);
        let (control, control_rx) = channel::unbounded();

        let worker = Worker {
            sink,
            staging: staging.clone(),
            handoff: handoff_rx,
            control: control_rx,
            flush_interval: config.flush_interval,
        };
        let handle = thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::Spawn(Arc::new(e)))?;

        info!(file = %config.path.display(), "opened rotating log file");

        Ok(RotatingWriter {
            shared: Arc::new(Shared {
                staging,
                flush_threshold: config.flush_threshold,
                handoff,
                control,
                worker: Mutex::new(Some(handle)),
                closed: OnceLock::new(),
            }),
        })
    }
}

/// The single owner of the active file.
struct Worker {
    sink: FileSink,
    staging: Arc<Staging>,
    handoff: Receiver<PooledBuffer>,
    control: Receiver<Control>,
    flush_interval: Duration,
}

impl Worker {
    fn run(mut self) -> Result<()> {
        IN_WORKER.with(|flag| flag.set(true));
        let ticker = channel::tick(self.flush_interval);
        let handoff = self.handoff.clone();
        let control = self.control.clone();

        loop {
            select! {
                recv(handoff) -> buffer => match buffer {
                    Ok(buffer) => {
                        let _ = self.write(&buffer);
                    }
                    Err(_) => break,
                },
                recv(control) -> request => match request {
                    Ok(Control::Sync(reply)) => {
                        let result = self.sync();
                        let _ = reply.send(result);
                    }
                    Ok(Control::Shutdown) | Err(_) => break,
                },
                recv(ticker) -> _ => {
                    if handoff.is_empty() {
                        let pending = self.collect_pending();
                        let _ = self.write_all(pending);
                    }
                }
            }
        }

        debug!("log writer draining");
        let pending = self.collect_pending();
        let drained = self.write_all(pending);
        let closed = self.sink.close();
        drained.and(closed)
    }

    /// Everything handed off or staged so far, oldest first.
    fn collect_pending(&self) -> Vec<PooledBuffer> {
        let mut pending = Vec::new();
        loop {
            if let Some(mut state) = self.staging.state.try_lock() {
                // Nobody can queue while we hold the lock
                pending.extend(self.handoff.try_iter());
                pending.extend(state.current.take());
                return pending;
            }
            // The holder may be blocked on a full channel
            match self.handoff.try_recv() {
                Ok(buffer) => pending.push(buffer),
                Err(_) => thread::yield_now(),
            }
        }
    }

    /// Write one buffer; failures are logged and reported to the caller.
    fn write(&mut self, buffer: &[u8]) -> Result<()> {
        match self.sink.write_buffer(buffer) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(error = %e, bytes = buffer.len(), "failed to write log buffer");
                Err(e)
            }
        }
    }

    /// Write `buffers` in order, returning the first failure.
    fn write_all(&mut self, buffers: Vec<PooledBuffer>) -> Result<()> {
        let mut result = Ok(());
        for buffer in buffers {
            result = result.and(self.write(&buffer));
        }
        result
    }

    fn sync(&mut self) -> Result<()> {
        let pending = self.collect_pending();
        let written = self.write_all(pending);
        written.and(self.sink.sync())
    }
}

impl io::Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingWriter::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(io::Error::from)
    }
}

impl io::Write for &RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingWriter::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(io::Error::from)
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = &'a RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Writer with the default configuration for `path`.
impl TryFrom<&Path> for RotatingWriter {
    type Error = Error;

    fn try_from(path: &Path) -> Result<Self> {
        Self::new(FileLoggerConfig::builder(path).build()?)
    }
}
