//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! timeout executor, recovery layer, server:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//! ```
//!
//! # Design Decisions
//! - Structured logging with request IDs on every request-scoped event
//! - Metrics are cheap and safe to record without an exporter

pub mod logging;
pub mod metrics;
