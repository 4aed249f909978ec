use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::dispatch::context::Context;
use crate::error::PoolError;

/// Default number of records retained by the pool.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default size of a pooled scratch buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Free lists of reusable [`Context`] records and scratch buffers.
///
/// Capacity bounds retention only: `acquire` allocates a fresh record when
/// the free list is empty, `release` discards the record once the list is
/// full.
pub struct ContextPool {
    contexts: Mutex<Vec<Context>>,
    buffers: Mutex<Vec<BytesMut>>,
    capacity: usize,
    buffer_size: usize,
    closed: AtomicBool,
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self::with_options(capacity, 0, DEFAULT_BUFFER_SIZE)
    }

    /// Creates a pool with `prefill` records and buffers allocated up front.
    pub fn with_options(capacity: usize, prefill: usize, buffer_size: usize) -> Self {
        let prefill = prefill.min(capacity);
        let contexts = (0..prefill).map(|_| Context::new()).collect();
        let buffers = (0..prefill)
            .map(|_| BytesMut::with_capacity(buffer_size))
            .collect();

        Self {
            contexts: Mutex::new(contexts),
            buffers: Mutex::new(buffers),
            capacity,
            buffer_size,
            closed: AtomicBool::new(false),
        }
    }

    pub fn acquire(&self) -> Result<Context, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        Ok(self.contexts.lock().pop().unwrap_or_default())
    }

    /// Resets `ctx` and keeps it for reuse if the free list has room.
    pub fn release(&self, mut ctx: Context) {
        ctx.reset();
        if self.is_closed() {
            return;
        }
        let mut contexts = self.contexts.lock();
        if contexts.len() < self.capacity {
            contexts.push(ctx);
        }
    }

    pub fn acquire_buffer(&self) -> Result<BytesMut, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        Ok(self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size)))
    }

    pub fn release_buffer(&self, mut buf: BytesMut) {
        buf.clear();
        // A buffer that was split or grown no longer has the fixed size.
        if buf.capacity() < self.buffer_size || self.is_closed() {
            return;
        }
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.capacity {
            buffers.push(buf);
        }
    }

    /// Rejects all further acquisitions and drops the free lists.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.contexts.lock().clear();
        self.buffers.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Records currently waiting in the free list.
    pub fn idle(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn idle_buffers(&self) -> usize {
        self.buffers.lock().len()
    }
}
