//! Configuration schema for the demo server and its timeout layer.
//!
//! Every field has a default, so an empty TOML file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub listener: ListenerConfig,

    /// Handler deadline and fallback response.
    pub timeout: TimeoutSettings,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Where the demo server accepts connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Socket address, e.g. "127.0.0.1:8080".
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Handler timeout settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Deadline for each request in milliseconds.
    pub timeout_ms: u64,

    /// Status sent when the deadline wins.
    pub error_status: u16,

    /// Body sent when the deadline wins. Empty string selects the HTML page.
    pub default_msg: Option<String>,

    /// Content type of the fallback body.
    pub content_type: Option<String>,

    /// Exact request paths that bypass the deadline.
    pub skip_paths: Vec<String>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            error_status: 503,
            default_msg: None,
            content_type: None,
            skip_paths: vec!["/health".to_string()],
        }
    }
}

/// Logging and metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Level applied to this crate and tower-http when `RUST_LOG` is unset.
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    /// Scrape endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
