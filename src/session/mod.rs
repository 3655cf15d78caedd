//! Session affinity subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → resolver.rs (cookie/header → id.rs validate → store GET → sanitize → annotate)
//!     → [routing to a backend]
//!     → capture.rs (strip X-New-Session-Data, record PendingMutation)
//!     → client receives response
//!     → persister.rs (SETEX with full TTL, or EXPIRE on `{}`/`null`)
//! ```
//!
//! # Design Decisions
//! - Fail-open: a store failure never fails the proxied request
//! - The identifier and pending mutation are scoped to one request
//! - Concurrent writers race at the store; last write wins

pub mod capture;
pub mod id;
pub mod lookup;
pub mod persister;
pub mod pipeline;
pub mod resolver;

pub use id::SessionId;
pub use lookup::{PendingMutation, SessionChange, SessionLookup};
pub use persister::MutationPersister;
pub use pipeline::{session_middleware, ResolvedSession, SessionPipeline};
pub use resolver::SessionResolver;
