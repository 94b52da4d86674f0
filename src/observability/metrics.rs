//! Metrics collection and exposition.
//!
//! # Metrics
//! - `handler_timeout_outcomes_total` (counter): requests by outcome
//! - `handler_timeout_duration_seconds` (histogram): time until the response was decided
//! - `handler_timeout_pool_idle_buffers` (gauge): buffers waiting for reuse
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op without a recorder
//! - Prometheus exporter is opt-in

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_outcome(outcome: &'static str, start: Instant) {
    metrics::counter!("handler_timeout_outcomes_total", "outcome" => outcome).increment(1);
    metrics::histogram!("handler_timeout_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_pool_idle(idle: usize) {
    metrics::gauge!("handler_timeout_pool_idle_buffers").set(idle as f64);
}
