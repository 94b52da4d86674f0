//! Reusable body buffers.
//!
//! # Responsibilities
//! - Hand out empty buffers for capture sinks
//! - Take buffers back after a commit and keep them for the next request
//!
//! # Design Decisions
//! - A buffer is exclusively owned by the caller while checked out
//! - Oversized buffers are dropped on release so one huge response does not pin memory
//! - An empty pool allocates fresh; there is no error path

use std::sync::Mutex;

/// Initial capacity of freshly allocated buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Upper bound on idle buffers retained by default.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Buffers that grew past this capacity are not retained.
pub const DEFAULT_MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// Pool of byte buffers shared by every request served through one layer.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    max_retained_capacity: usize,
}

impl BufferPool {
    /// Create a pool with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_IDLE, DEFAULT_MAX_RETAINED_CAPACITY)
    }

    /// Create a pool keeping at most `max_idle` buffers of at most
    /// `max_retained_capacity` bytes each.
    pub fn with_limits(max_idle: usize, max_retained_capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            max_retained_capacity,
        }
    }

    /// Check out an empty buffer, reusing an idle one when available.
    pub fn acquire(&self) -> Vec<u8> {
        let reused = self.idle.lock().expect("buffer pool mutex poisoned").pop();
        reused.unwrap_or_else(|| Vec::with_capacity(DEFAULT_BUFFER_CAPACITY))
    }

    /// Return a buffer. Its contents are cleared before it becomes reusable.
    pub fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > self.max_retained_capacity {
            return;
        }
        buffer.clear();

        let mut idle = self.idle.lock().expect("buffer pool mutex poisoned");
        if idle.len() < self.max_idle {
            idle.push(buffer);
        }
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("buffer pool mutex poisoned").len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
