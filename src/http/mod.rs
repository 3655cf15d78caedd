//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID assigned and propagated)
//!     → session pipeline (resolve, annotate)
//!     → upstream.rs (rotate backend, rewrite URI, forward)
//!     → session pipeline (capture, persist after the body is sent)
//!     → Send to client
//! ```

pub mod request;
pub mod server;
pub mod upstream;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
pub use upstream::{Upstream, UpstreamError};
