//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware wiring)
//!     → request.rs (request ID)
//!     → recovery.rs (panic → 500)
//!     → timeout layer (deadline, capture, fallback)
//!     → handler
//! ```

pub mod recovery;
pub mod request;
pub mod server;

pub use recovery::recovery_layer;
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
