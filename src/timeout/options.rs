//! Timeout policy.
//!
//! # Responsibilities
//! - Hold the deadline, fallback response, timeout callbacks and skip predicate
//! - Build that policy from independent setters or from loaded settings
//!
//! # Design Decisions
//! - Immutable once built; shared by reference across requests
//! - Setters apply in call order: installing a whole fallback strategy and
//!   then setting its status overrides the strategy's status, and vice versa
//! - The fallback strategy sees the request head, so bodies can depend on it

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Extensions, HeaderValue, Request, StatusCode},
};
use bytes::Bytes;

use crate::config::schema::TimeoutSettings;
use crate::config::validation::ValidationError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_MSG: &str = r#"{"code": -1, "msg":"http: Handler timeout"}"#;

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Body sent when the configured message is empty.
pub const HTML_FALLBACK: &str =
    "<html><head><title>Timeout</title></head><body><h1>Timeout</h1></body></html>";

/// Invoked once per timed-out request with a detached copy of the request head.
pub type TimeoutCallback = Arc<dyn Fn(Request<()>) + Send + Sync>;

/// Invoked once per timed-out request with the request's extensions: the
/// per-request state attached by outer middleware (request id, auth data).
pub type ContextCallback = Arc<dyn Fn(&Extensions) + Send + Sync>;

/// Returns `true` for requests that bypass the deadline.
pub type SkipPredicate = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;

/// Strategy producing the response sent when the deadline wins.
pub trait FallbackResponse: Send + Sync {
    fn status(&self, request: &Request<()>) -> StatusCode;

    fn content(&self, request: &Request<()>) -> Bytes;

    fn content_type(&self, request: &Request<()>) -> Option<HeaderValue>;

    fn set_status(&mut self, status: StatusCode);

    fn set_content(&mut self, content: Bytes);

    fn set_content_type(&mut self, content_type: HeaderValue);
}

/// Static fallback response.
#[derive(Debug, Clone)]
pub struct BaseResponse {
    pub status: StatusCode,
    pub content: Bytes,
    pub content_type: Option<HeaderValue>,
}

impl Default for BaseResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            content: Bytes::from_static(DEFAULT_MSG.as_bytes()),
            content_type: Some(HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
        }
    }
}

impl FallbackResponse for BaseResponse {
    fn status(&self, _request: &Request<()>) -> StatusCode {
        self.status
    }

    fn content(&self, _request: &Request<()>) -> Bytes {
        if self.content.is_empty() {
            Bytes::from_static(HTML_FALLBACK.as_bytes())
        } else {
            self.content.clone()
        }
    }

    fn content_type(&self, _request: &Request<()>) -> Option<HeaderValue> {
        self.content_type.clone()
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn set_content(&mut self, content: Bytes) {
        self.content = content;
    }

    fn set_content_type(&mut self, content_type: HeaderValue) {
        self.content_type = Some(content_type);
    }
}

/// Policy applied by the timeout executor.
pub struct TimeoutOptions {
    timeout: Duration,
    response: Box<dyn FallbackResponse>,
    callback: Option<TimeoutCallback>,
    context_callback: Option<ContextCallback>,
    skip: Option<SkipPredicate>,
}

impl TimeoutOptions {
    pub fn builder() -> TimeoutOptionsBuilder {
        TimeoutOptionsBuilder::new()
    }

    /// Deadline applied to each request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn response(&self) -> &dyn FallbackResponse {
        self.response.as_ref()
    }

    pub fn callback(&self) -> Option<&TimeoutCallback> {
        self.callback.as_ref()
    }

    pub fn context_callback(&self) -> Option<&ContextCallback> {
        self.context_callback.as_ref()
    }

    /// Whether `request` bypasses enforcement. Always `false` without a predicate.
    pub fn should_skip(&self, request: &Request<Body>) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(request))
    }
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        TimeoutOptionsBuilder::new().build()
    }
}

impl fmt::Debug for TimeoutOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutOptions")
            .field("timeout", &self.timeout)
            .field("callback", &self.callback.is_some())
            .field("context_callback", &self.context_callback.is_some())
            .field("skip", &self.skip.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`TimeoutOptions`].
pub struct TimeoutOptionsBuilder {
    options: TimeoutOptions,
}

impl TimeoutOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: TimeoutOptions {
                timeout: DEFAULT_TIMEOUT,
                response: Box::new(BaseResponse::default()),
                callback: None,
                context_callback: None,
                skip: None,
            },
        }
    }

    /// Build from validated configuration settings.
    pub fn from_settings(settings: &TimeoutSettings) -> Result<Self, ValidationError> {
        let status = StatusCode::from_u16(settings.error_status)
            .map_err(|_| ValidationError::InvalidErrorStatus(settings.error_status))?;

        let mut builder = Self::new()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .error_status(status);

        if let Some(msg) = &settings.default_msg {
            builder = builder.default_msg(msg.clone());
        }
        if let Some(content_type) = &settings.content_type {
            let value = HeaderValue::from_str(content_type)
                .map_err(|_| ValidationError::InvalidContentType(content_type.clone()))?;
            builder = builder.content_type(value);
        }
        if !settings.skip_paths.is_empty() {
            let paths = settings.skip_paths.clone();
            builder = builder.skip(move |req: &Request<Body>| {
                paths.iter().any(|p| p == req.uri().path())
            });
        }
        Ok(builder)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Status of the fallback response (default 503).
    pub fn error_status(mut self, status: StatusCode) -> Self {
        self.options.response.set_status(status);
        self
    }

    /// Body of the fallback response.
    pub fn default_msg(mut self, msg: impl Into<Bytes>) -> Self {
        self.options.response.set_content(msg.into());
        self
    }

    pub fn content_type(mut self, content_type: HeaderValue) -> Self {
        self.options.response.set_content_type(content_type);
        self
    }

    /// Replace the whole fallback strategy.
    pub fn response(mut self, response: impl FallbackResponse + 'static) -> Self {
        self.options.response = Box::new(response);
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Request<()>) + Send + Sync + 'static,
    {
        self.options.callback = Some(Arc::new(callback));
        self
    }

    /// Callback receiving the timed-out request's extensions. Runs before
    /// [`callback`](Self::callback) when both are set.
    pub fn context_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Extensions) + Send + Sync + 'static,
    {
        self.options.context_callback = Some(Arc::new(callback));
        self
    }

    pub fn skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        self.options.skip = Some(Arc::new(skip));
        self
    }

    pub fn build(self) -> TimeoutOptions {
        self.options
    }
}

impl Default for TimeoutOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
