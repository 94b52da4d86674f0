//! Timeout executor.
//!
//! # Flow
//! ```text
//! execute(request, real sink, handler)
//!     → skip predicate matches: run handler against the real sink, done
//!     → derive deadline context, wrap real sink in a CaptureSink
//!     → spawn handler task (panics caught and reported as a signal)
//!     → race:
//!         completion signal → commit captured output       (Committed)
//!         failure signal    → discard, return the failure  (Failed)
//!         deadline          → send fallback, run callbacks (TimedOut)
//!         upstream cancel   → send nothing                 (Canceled)
//! ```
//!
//! # Design Decisions
//! - One fresh task per request; never reused
//! - The handler reports through a oneshot, whose send never blocks, so a
//!   worker that outlives the race still terminates
//! - When the deadline and completion are both ready, the deadline wins: a
//!   handler that bailed out on cancellation must not have its partial
//!   output committed
//! - Cancellation is cooperative: a handler ignoring its context keeps
//!   running, and its late output is dropped by the capture sink
//! - The deadline timer is released on every exit path

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request},
};
use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::http::request::request_id;
use crate::observability::metrics;
use crate::timeout::capture::CaptureSink;
use crate::timeout::context::{CancelCause, DeadlineGuard, RequestContext, RequestContextExt};
use crate::timeout::error::{install_panic_capture, HandlerFailure};
use crate::timeout::options::TimeoutOptions;
use crate::timeout::pool::BufferPool;
use crate::timeout::sink::ResponseSink;

/// How a request ended without a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The skip predicate matched; no buffering, no deadline.
    Skipped,
    /// The handler's own response was sent.
    Committed,
    /// The fallback response was sent.
    TimedOut,
    /// The request was cancelled upstream; nothing was sent.
    Canceled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::Committed => "committed",
            Outcome::TimedOut => "timed_out",
            Outcome::Canceled => "canceled",
        }
    }
}

enum Signal {
    Finished,
    Panicked(HandlerFailure),
}

/// Per-request state, alive for the duration of one `execute` call.
struct Execution {
    ctx: RequestContext,
    capture: Arc<CaptureSink>,
    _deadline: DeadlineGuard,
}

impl Drop for Execution {
    fn drop(&mut self) {
        // The serving future was dropped mid-race (client gone).
        self.capture.cancel();
    }
}

/// Runs handlers under a deadline and decides which response is sent.
#[derive(Debug)]
pub struct TimeoutExecutor {
    options: Arc<TimeoutOptions>,
    pool: Arc<BufferPool>,
}

impl TimeoutExecutor {
    pub fn new(options: TimeoutOptions) -> Self {
        Self::with_pool(Arc::new(options), Arc::new(BufferPool::new()))
    }

    /// Build an executor sharing an existing buffer pool.
    pub fn with_pool(options: Arc<TimeoutOptions>, pool: Arc<BufferPool>) -> Self {
        install_panic_capture();
        Self { options, pool }
    }

    pub fn options(&self) -> &TimeoutOptions {
        &self.options
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Run `handler` for `request`, writing the winning response to `sink`.
    ///
    /// Returns the handler's panic as `Err` so the caller can re-raise it to
    /// an outer recovery layer; in that case nothing was written to `sink`.
    pub async fn execute<H, Fut>(
        &self,
        mut request: Request<Body>,
        sink: Arc<dyn ResponseSink>,
        handler: H,
    ) -> Result<Outcome, HandlerFailure>
    where
        H: FnOnce(Request<Body>, Arc<dyn ResponseSink>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let start = Instant::now();
        let path = request.uri().path().to_owned();
        let request_id = request_id(request.headers()).to_owned();

        if self.options.should_skip(&request) {
            tracing::debug!(request_id = %request_id, path = %path, "Deadline skipped");
            handler(request, sink).await;
            metrics::record_outcome(Outcome::Skipped.as_str(), start);
            return Ok(Outcome::Skipped);
        }

        let (ctx, deadline) = request.context().with_timeout(self.options.timeout());
        let head = request_head(&request, ctx.detached());
        request.set_context(ctx.clone());

        let execution = Execution {
            ctx,
            capture: Arc::new(CaptureSink::new(self.pool.acquire())),
            _deadline: deadline,
        };

        let (tx, rx) = oneshot::channel();
        let worker_sink: Arc<dyn ResponseSink> = execution.capture.clone();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(async move { handler(request, worker_sink).await });
            let signal = match run.catch_unwind().await {
                Ok(()) => Signal::Finished,
                Err(payload) => Signal::Panicked(HandlerFailure::from_panic(payload)),
            };
            // The receiver is gone if the deadline already won.
            if let Err(Signal::Panicked(failure)) = tx.send(signal) {
                tracing::error!(error = %failure, "Handler panicked after the response was decided");
            }
        });

        let result = tokio::select! {
            biased;

            _ = execution.ctx.cancelled() => match execution.ctx.cause() {
                Some(CancelCause::DeadlineExceeded) => {
                    if self.time_out(&execution.capture, sink.as_ref(), head) {
                        tracing::warn!(
                            request_id = %request_id,
                            path = %path,
                            timeout_ms = self.options.timeout().as_millis() as u64,
                            buffered_bytes = execution.capture.size(),
                            "Handler timed out"
                        );
                    }
                    Ok(Outcome::TimedOut)
                }
                _ => {
                    execution.capture.cancel();
                    tracing::debug!(request_id = %request_id, path = %path, "Request cancelled upstream");
                    Ok(Outcome::Canceled)
                }
            },

            signal = rx => match signal {
                Ok(Signal::Finished) => {
                    execution.capture.commit(sink.as_ref(), &self.pool);
                    Ok(Outcome::Committed)
                }
                Ok(Signal::Panicked(failure)) => {
                    execution.capture.fail(&self.pool);
                    Err(failure)
                }
                Err(_) => {
                    execution.capture.fail(&self.pool);
                    Err(HandlerFailure::lost())
                }
            },
        };

        match &result {
            Ok(outcome) => metrics::record_outcome(outcome.as_str(), start),
            Err(failure) => {
                tracing::error!(
                    request_id = %request_id,
                    path = %path,
                    error = %failure,
                    backtrace = %failure.backtrace(),
                    "Handler failed"
                );
                metrics::record_outcome("failed", start);
            }
        }
        metrics::record_pool_idle(self.pool.idle_count());
        result
    }

    /// Send the fallback response and run the callbacks. Returns `false` if
    /// the capture sink had already reached a terminal state.
    fn time_out(&self, capture: &CaptureSink, sink: &dyn ResponseSink, head: Request<()>) -> bool {
        let response = self.options.response();
        let sent = capture.time_out(|| {
            if let Some(content_type) = response.content_type(&head) {
                sink.header().insert(CONTENT_TYPE, content_type);
            }
            sink.write_header(response.status(&head).as_u16());
            if let Err(e) = sink.write(&response.content(&head)) {
                tracing::warn!(error = %e, "Failed to write timeout response");
            }
        });
        if sent.is_none() {
            return false;
        }

        if let Some(callback) = self.options.context_callback() {
            callback(head.extensions());
        }
        if let Some(callback) = self.options.callback() {
            callback(head);
        }
        true
    }
}

/// Copy of the request head and extensions, carrying `ctx` instead of the
/// request's own context.
fn request_head(request: &Request<Body>, ctx: RequestContext) -> Request<()> {
    let mut head = Request::new(());
    *head.method_mut() = request.method().clone();
    *head.uri_mut() = request.uri().clone();
    *head.version_mut() = request.version();
    *head.headers_mut() = request.headers().clone();
    *head.extensions_mut() = request.extensions().clone();
    head.set_context(ctx);
    head
}
