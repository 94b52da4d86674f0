//! Panic recovery.
//!
//! # Responsibilities
//! - Turn a panic escaping the inner stack into a 500 response
//! - Log the failure with whatever diagnostics it carries
//!
//! # Design Decisions
//! - Sits outside the timeout layer, which re-raises handler failures
//! - Body is JSON with an error code and the fault description

use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;

use crate::timeout::error::{panic_message, HandlerFailure};

/// Error code for unclassified internal failures.
pub const ERR_UNKNOWN: &str = "E003";

/// Error body returned to the client.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub msg: String,
}

pub type PanicResponder = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Layer catching panics from everything it wraps.
pub fn recovery_layer() -> CatchPanicLayer<PanicResponder> {
    CatchPanicLayer::custom(panic_response as PanicResponder)
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic_message(payload.as_ref());

    match payload.downcast_ref::<HandlerFailure>() {
        Some(failure) => tracing::error!(
            location = failure.location().unwrap_or("unknown"),
            error = %detail,
            "Recovered from handler failure"
        ),
        None => tracing::error!(error = %detail, "Recovered from panic"),
    }

    let body = ErrorResponse {
        code: ERR_UNKNOWN,
        msg: format!("unknown internal error, {}", detail),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_renders_string_payload() {
        let response = panic_response(Box::new(String::from("disk on fire")));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "E003");
        assert_eq!(json["msg"], "unknown internal error, disk on fire");
    }

    #[tokio::test]
    async fn test_renders_handler_failure() {
        let failure = HandlerFailure::from_panic(Box::new("attempt to divide by zero"));
        let response = panic_response(Box::new(failure));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["msg"], "unknown internal error, attempt to divide by zero");
    }
}
