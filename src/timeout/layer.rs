//! Tower middleware wrapping a service in the timeout executor.
//!
//! # Responsibilities
//! - Expose the executor as a `Layer` for axum routers and tower stacks
//! - Drain the inner service's response into the capture sink
//! - Turn the recorded exchange back into a response
//!
//! # Design Decisions
//! - Handler failures are re-raised as a panic carrying [`HandlerFailure`];
//!   an outer recovery layer renders them
//! - Skipped requests call the inner service directly with no buffering
//! - A request cancelled upstream answers `499 Client Closed Request`, which
//!   nobody reads

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use futures_util::{future::BoxFuture, StreamExt};
use tower::{Layer, Service, ServiceExt};

use crate::timeout::executor::{Outcome, TimeoutExecutor};
use crate::timeout::options::TimeoutOptions;
use crate::timeout::pool::BufferPool;
use crate::timeout::sink::{ResponseRecorder, ResponseSink};

/// Layer applying [`HandlerTimeout`] to a service.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    executor: Arc<TimeoutExecutor>,
}

impl TimeoutLayer {
    pub fn new(options: TimeoutOptions) -> Self {
        Self {
            executor: Arc::new(TimeoutExecutor::new(options)),
        }
    }

    /// Share a buffer pool with other layers.
    pub fn with_pool(options: TimeoutOptions, pool: Arc<BufferPool>) -> Self {
        Self {
            executor: Arc::new(TimeoutExecutor::with_pool(Arc::new(options), pool)),
        }
    }

    pub fn executor(&self) -> &Arc<TimeoutExecutor> {
        &self.executor
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = HandlerTimeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HandlerTimeout {
            inner,
            executor: self.executor.clone(),
        }
    }
}

/// Service running its inner service under the timeout executor.
#[derive(Debug, Clone)]
pub struct HandlerTimeout<S> {
    inner: S,
    executor: Arc<TimeoutExecutor>,
}

impl<S> Service<Request<Body>> for HandlerTimeout<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Take the service that was driven to readiness.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let executor = self.executor.clone();

        Box::pin(async move {
            if executor.options().should_skip(&request) {
                return inner.oneshot(request).await;
            }

            let recorder = Arc::new(ResponseRecorder::new());
            let outcome = executor
                .execute(request, recorder.clone(), move |request, sink| async move {
                    let response = match inner.oneshot(request).await {
                        Ok(response) => response,
                        Err(never) => match never {},
                    };
                    drain_into(response, sink.as_ref()).await;
                })
                .await;

            match outcome {
                Ok(Outcome::Canceled) => {
                    let mut response = Response::new(Body::empty());
                    *response.status_mut() = client_closed_request();
                    Ok(response)
                }
                Ok(_) => Ok(recorder.take_response()),
                Err(failure) => std::panic::panic_any(failure),
            }
        })
    }
}

/// Non-standard status used when the client disconnected first.
fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Write a finished response through a sink: headers, status, then body
/// chunks as they arrive.
pub async fn drain_into(response: Response, sink: &dyn ResponseSink) {
    let (parts, body) = response.into_parts();
    {
        let mut headers = sink.header();
        for (name, value) in parts.headers.iter() {
            headers.append(name.clone(), value.clone());
        }
    }
    sink.write_header(parts.status.as_u16());

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if let Err(e) = sink.write(&bytes) {
                    tracing::warn!(error = %e, "Failed to buffer response chunk");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Handler response body failed");
                break;
            }
        }
    }
}
