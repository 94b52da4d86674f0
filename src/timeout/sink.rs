//! Response sink abstraction.
//!
//! # Responsibilities
//! - Define the write surface handlers produce output through
//! - Provide the real transport-side sink that becomes the client response
//!
//! # Design Decisions
//! - Methods take `&self`; sinks are shared between the serving task and
//!   the handler task, so implementations use interior locking
//! - Header mutation goes through a guard on the live header map
//! - Invalid status codes are programmer errors and panic

use std::io;
use std::sync::{Mutex, MutexGuard};

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::Response,
};

/// Destination for a handler's status, headers and body.
pub trait ResponseSink: Send + Sync {
    /// Append body bytes, returning how many were accepted.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Record the response status.
    ///
    /// # Panics
    /// If `code` is outside `100..=999`.
    fn write_header(&self, code: u16);

    /// Force headers out without a body write.
    fn write_header_now(&self);

    /// The mutable header set of the pending response.
    fn header(&self) -> MutexGuard<'_, HeaderMap>;

    /// Status that would be sent right now.
    fn status(&self) -> StatusCode;

    /// Body bytes accepted so far.
    fn size(&self) -> usize;

    /// Whether headers have been committed.
    fn written(&self) -> bool;
}

/// Validate a status code passed to [`ResponseSink::write_header`].
pub fn checked_status(code: u16) -> StatusCode {
    match StatusCode::from_u16(code) {
        Ok(status) => status,
        Err(_) => panic!("invalid WriteHeader code {code}"),
    }
}

#[derive(Debug)]
struct Recorded {
    status: StatusCode,
    /// Header snapshot taken when the response was committed.
    committed: Option<HeaderMap>,
    body: Vec<u8>,
}

/// The client-facing sink.
///
/// Headers are frozen on the first body write or `write_header_now`; later
/// header or status changes do not reach the client, mirroring a real
/// connection. After the serving task is done with it, the recorded
/// exchange is turned into an axum [`Response`].
#[derive(Debug)]
pub struct ResponseRecorder {
    state: Mutex<Recorded>,
    headers: Mutex<HeaderMap>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Recorded {
                status: StatusCode::OK,
                committed: None,
                body: Vec::new(),
            }),
            headers: Mutex::new(HeaderMap::new()),
        }
    }

    fn commit(&self, state: &mut Recorded) {
        if state.committed.is_none() {
            let headers = self.headers.lock().expect("recorder headers mutex poisoned");
            state.committed = Some(headers.clone());
        }
    }

    /// Take the recorded exchange as a response, leaving the recorder empty.
    pub fn take_response(&self) -> Response {
        let mut state = self.state.lock().expect("recorder mutex poisoned");
        let headers = match state.committed.take() {
            Some(headers) => headers,
            None => self.headers.lock().expect("recorder headers mutex poisoned").clone(),
        };
        let body = std::mem::take(&mut state.body);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = state.status;
        *response.headers_mut() = headers;
        response
    }
}

impl Default for ResponseRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSink for ResponseRecorder {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().expect("recorder mutex poisoned");
        self.commit(&mut state);
        state.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn write_header(&self, code: u16) {
        let status = checked_status(code);
        let mut state = self.state.lock().expect("recorder mutex poisoned");
        if state.committed.is_some() {
            tracing::warn!(
                current = %state.status,
                attempted = %status,
                "Response headers were already written"
            );
            return;
        }
        state.status = status;
    }

    fn write_header_now(&self) {
        let mut state = self.state.lock().expect("recorder mutex poisoned");
        self.commit(&mut state);
    }

    fn header(&self) -> MutexGuard<'_, HeaderMap> {
        self.headers.lock().expect("recorder headers mutex poisoned")
    }

    fn status(&self) -> StatusCode {
        self.state.lock().expect("recorder mutex poisoned").status
    }

    fn size(&self) -> usize {
        self.state.lock().expect("recorder mutex poisoned").body.len()
    }

    fn written(&self) -> bool {
        self.state.lock().expect("recorder mutex poisoned").committed.is_some()
    }
}
