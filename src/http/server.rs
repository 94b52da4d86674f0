//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the demo handlers
//! - Wire up middleware (request ID, tracing, recovery, handler timeout)
//! - Bind server to listener and serve until shutdown
//!
//! # Middleware Order
//! ```text
//! set request id → trace → propagate request id → recovery → timeout → handler
//! ```

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{extract::Extension, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::validation::ValidationError;
use crate::config::AppConfig;
use crate::http::recovery::recovery_layer;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::timeout::{RequestContext, TimeoutLayer, TimeoutOptions, TimeoutOptionsBuilder};

/// Demo server running every route under the handler timeout.
pub struct HttpServer {
    router: Router,
    config: AppConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: AppConfig) -> Result<Self, ValidationError> {
        let options = TimeoutOptionsBuilder::from_settings(&config.timeout)?
            .callback(|request| {
                tracing::info!(url = %request.uri(), "Timeout happened");
            })
            .build();

        let router = Self::build_router(options);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(options: TimeoutOptions) -> Router {
        Router::new()
            .route("/", get(now))
            .route("/short", get(short))
            .route("/long", get(long))
            .route("/long2", get(long2))
            .route("/boundary", get(boundary))
            .route("/panic", get(divide_by_zero))
            .route("/health", get(health))
            .layer(TimeoutLayer::new(options))
            .layer(recovery_layer())
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            timeout_ms = self.config.timeout.timeout_ms,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

async fn now() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", since_epoch.as_secs(), since_epoch.subsec_millis())
}

async fn short() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(1)).await;
    Json(json!({"hello": "short"}))
}

/// Ignores cancellation; keeps running after the fallback was sent.
async fn long() -> Json<Value> {
    tracing::debug!("handler-long1, do something...");
    tokio::time::sleep(Duration::from_secs(3)).await;
    tracing::debug!("handler-long2, do something...");
    tokio::time::sleep(Duration::from_secs(3)).await;
    tracing::debug!("handler-long3, do something...");
    Json(json!({"hello": "long"}))
}

/// Gives up as soon as its context is cancelled.
async fn long2(Extension(ctx): Extension<RequestContext>) -> Result<Json<Value>, StatusCode> {
    tokio::select! {
        _ = ctx.cancelled() => {
            tracing::debug!(cause = ?ctx.cause(), "long2 cancelled");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(Json(json!({"hello": "long2"}))),
    }
}

async fn boundary() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({"hello": "boundary"}))
}

async fn divide_by_zero() -> String {
    tokio::time::sleep(Duration::from_secs(1)).await;
    let divisor = std::hint::black_box(0);
    (100 / divisor).to_string()
}

async fn health() -> &'static str {
    "ok"
}
