//! Bounded-time handler execution.
//!
//! # Data Flow
//! ```text
//! Request
//!     → layer.rs (tower entry point, skip check)
//!     → executor.rs (deadline context, spawn handler, race)
//!         handler writes → capture.rs (private buffer from pool.rs)
//!     → exactly one of:
//!         commit captured output → sink.rs (real sink)
//!         fallback from options.rs → sink.rs (real sink)
//!         HandlerFailure (error.rs) → re-raised to the recovery layer
//!         nothing (client gone)
//! ```
//!
//! # Design Decisions
//! - Only the executor touches the real sink, and only after the race
//! - Policy is immutable and passed in explicitly; no global defaults
//! - Cancellation is cooperative through `context.rs`

pub mod capture;
pub mod context;
pub mod error;
pub mod executor;
pub mod layer;
pub mod options;
pub mod pool;
pub mod sink;

pub use capture::{CaptureSink, SinkState};
pub use context::{CancelCause, RequestContext, RequestContextExt};
pub use error::HandlerFailure;
pub use executor::{Outcome, TimeoutExecutor};
pub use layer::{HandlerTimeout, TimeoutLayer};
pub use options::{BaseResponse, FallbackResponse, TimeoutOptions, TimeoutOptionsBuilder};
pub use pool::BufferPool;
pub use sink::{ResponseRecorder, ResponseSink};
