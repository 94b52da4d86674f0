//! Capture sink: holds a handler's output until the executor decides.
//!
//! # States
//! ```text
//! Running → Committed : handler finished first, output copied to the client
//! Running → TimedOut  : deadline won, fallback sent instead
//! Running → Canceled  : client went away, nothing sent
//! Running → Failed    : handler panicked, output discarded
//! ```
//!
//! # Design Decisions
//! - One mutex guards the state, status and body; the decision is made
//!   under that same lock so a racing write is either fully captured
//!   before it or rejected after it
//! - Writes after a terminal state are silently dropped (`Ok(0)`)
//! - Lock order is `headers` then `inner`, matching a handler that writes
//!   while still holding the [`ResponseSink::header`] guard
//! - The real sink is never reachable from the handler

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use axum::http::{HeaderMap, StatusCode};

use crate::timeout::pool::BufferPool;
use crate::timeout::sink::{checked_status, ResponseSink};

/// Lifecycle of one captured response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Running,
    Committed,
    TimedOut,
    Canceled,
    Failed,
}

impl SinkState {
    pub fn is_terminal(self) -> bool {
        self != SinkState::Running
    }
}

#[derive(Debug)]
struct Captured {
    state: SinkState,
    status: Option<StatusCode>,
    body: Vec<u8>,
}

/// Buffers status, headers and body written by a handler.
#[derive(Debug)]
pub struct CaptureSink {
    inner: Mutex<Captured>,
    headers: Mutex<HeaderMap>,
    bytes_written: AtomicUsize,
}

impl CaptureSink {
    /// Create a sink writing into `buffer`, typically taken from a [`BufferPool`].
    pub fn new(buffer: Vec<u8>) -> Self {
        Self {
            inner: Mutex::new(Captured {
                state: SinkState::Running,
                status: None,
                body: buffer,
            }),
            headers: Mutex::new(HeaderMap::new()),
            bytes_written: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.inner.lock().expect("capture sink mutex poisoned")
    }

    pub fn state(&self) -> SinkState {
        self.lock().state
    }

    /// Leave `Running` for `next` and run `f` under the lock.
    ///
    /// Returns `None` without calling `f` if a terminal state was already
    /// reached; each sink transitions exactly once.
    fn resolve<R>(&self, next: SinkState, f: impl FnOnce(&mut Captured) -> R) -> Option<R> {
        debug_assert!(next.is_terminal());
        let mut captured = self.lock();
        if captured.state.is_terminal() {
            return None;
        }
        captured.state = next;
        Some(f(&mut captured))
    }

    /// Copy the captured response into `real` and hand the buffer back to `pool`.
    ///
    /// Headers are appended per name so multi-value headers survive. If the
    /// handler never set a status, the real sink's current status is used.
    /// Must only be called once the handler has finished.
    pub fn commit(&self, real: &dyn ResponseSink, pool: &BufferPool) -> bool {
        let mut captured_headers = self.header();
        self.resolve(SinkState::Committed, |captured| {
            let headers = std::mem::take(&mut *captured_headers);
            {
                let mut dst = real.header();
                for (name, value) in headers.iter() {
                    dst.append(name.clone(), value.clone());
                }
            }

            let status = captured.status.unwrap_or_else(|| real.status());
            real.write_header(status.as_u16());

            let body = std::mem::take(&mut captured.body);
            if let Err(e) = real.write(&body) {
                tracing::warn!(error = %e, "Failed to flush captured body");
            }
            pool.release(body);
        })
        .is_some()
    }

    /// Mark the sink timed out and run `send_fallback` while holding the lock.
    ///
    /// The body buffer stays with the sink: the handler task may still hold a
    /// reference, so it is freed when the last reference drops instead of
    /// being pooled.
    pub fn time_out<R>(&self, send_fallback: impl FnOnce() -> R) -> Option<R> {
        self.resolve(SinkState::TimedOut, |_| send_fallback())
    }

    /// Mark the sink cancelled; nothing is sent.
    pub fn cancel(&self) -> bool {
        self.resolve(SinkState::Canceled, |_| ()).is_some()
    }

    /// Discard captured output after a handler failure.
    pub fn fail(&self, pool: &BufferPool) -> bool {
        self.resolve(SinkState::Failed, |captured| {
            pool.release(std::mem::take(&mut captured.body));
        })
        .is_some()
    }
}

impl ResponseSink for CaptureSink {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut captured = self.lock();
        if captured.state.is_terminal() {
            return Ok(0);
        }
        captured.body.extend_from_slice(data);
        self.bytes_written.fetch_add(data.len(), Ordering::Relaxed);
        Ok(data.len())
    }

    fn write_header(&self, code: u16) {
        let status = checked_status(code);
        let mut captured = self.lock();
        if captured.state.is_terminal() {
            return;
        }
        captured.status = Some(status);
    }

    /// Headers never leave before the executor commits.
    fn write_header_now(&self) {}

    fn header(&self) -> MutexGuard<'_, HeaderMap> {
        self.headers.lock().expect("capture headers mutex poisoned")
    }

    fn status(&self) -> StatusCode {
        self.lock().status.unwrap_or(StatusCode::OK)
    }

    fn size(&self) -> usize {
        self.bytes_written.load(Ordering::Relaxed)
    }

    fn written(&self) -> bool {
        self.lock().status.is_some()
    }
}
