//! Bounded-time request execution for axum/tower services.

pub mod config;
pub mod http;
pub mod observability;
pub mod timeout;

pub use config::schema::AppConfig;
pub use http::HttpServer;
pub use timeout::{TimeoutLayer, TimeoutOptions};
