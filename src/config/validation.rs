//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (deadline > 0, status codes, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderValue;
use thiserror::Error;

use crate::config::schema::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("timeout.timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("timeout.error_status {0} is outside 100..=999")]
    InvalidErrorStatus(u16),

    #[error("timeout.content_type {0:?} is not a valid header value")]
    InvalidContentType(String),

    #[error("timeout.skip_paths entry {0:?} must start with '/'")]
    InvalidSkipPath(String),

    #[error("{field} {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("observability.log_format {0:?} must be \"pretty\" or \"json\"")]
    InvalidLogFormat(String),
}

/// Check every rule and collect all violations.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let timeout = &config.timeout;
    if timeout.timeout_ms == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if !(100..=999).contains(&timeout.error_status) {
        errors.push(ValidationError::InvalidErrorStatus(timeout.error_status));
    }
    if let Some(content_type) = &timeout.content_type {
        if HeaderValue::from_str(content_type).is_err() {
            errors.push(ValidationError::InvalidContentType(content_type.clone()));
        }
    }
    for path in &timeout.skip_paths {
        if !path.starts_with('/') {
            errors.push(ValidationError::InvalidSkipPath(path.clone()));
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }
    if !matches!(observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::InvalidLogFormat(observability.log_format.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
