//! Session affinity reverse proxy.
//!
//! Keeps web sessions sticky across a pool of interchangeable backends by
//! resolving each request's session from a shared key-value store, handing
//! the payload to the backend as a header, and persisting whatever the
//! backend asks for on the way out.

pub mod api;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod session;
pub mod store;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use store::StoreClient;
