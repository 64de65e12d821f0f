//! Bounded pool of staging buffers.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Buffers that grew beyond this are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 64 * 1024;

/// A bounded pool of reusable byte buffers.
///
/// At most `capacity` buffers are outstanding at any time. Once the limit is
/// reached [`BufferArena::acquire`] returns `None` instead of blocking, so a
/// burst of writes is turned into dropped records rather than unbounded
/// memory growth.
#[derive(Debug)]
pub struct BufferArena {
    capacity: usize,
    outstanding: AtomicUsize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferArena {
    /// Create an arena allowing `capacity` outstanding buffers.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            outstanding: AtomicUsize::new(0),
            free: Mutex::new(Vec::new()),
        })
    }

    /// Claim an empty buffer, or `None` when the arena is exhausted.
    ///
    /// The buffer goes back to the arena when the returned guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> Option<PooledBuffer> {
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return None;
            }
            match self.outstanding.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.clear();
        Some(PooledBuffer {
            buf,
            arena: Arc::clone(self),
        })
    }

    /// Number of buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Maximum number of outstanding buffers.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() <= MAX_POOLED_CAPACITY {
            buf.clear();
            let mut free = self.free.lock();
            if free.len() < self.capacity {
                free.push(buf);
            }
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A buffer on loan from a [`BufferArena`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    arena: Arc<BufferArena>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.arena.release(std::mem::take(&mut self.buf));
    }
}
