//! Session store subsystem.
//!
//! # Data Flow
//! ```text
//! session phases / management API
//!     → client.rs (StoreClient: one lease per operation, command deadline)
//!     → pool.rs (bb8 pool: reuse idle or connect + AUTH; release: keep or discard)
//!     → backend.rs traits
//!         → redis.rs (Redis-compatible server)
//!         → memory.rs (process-local, dev/test)
//! ```
//!
//! # Design Decisions
//! - A connection that produced any error is closed, never pooled
//! - Every acquisition and command has an explicit deadline
//! - Store configuration is resolved once and injected at construction

pub mod backend;
pub mod client;
pub mod error;
pub mod memory;
pub mod pool;
pub mod redis;

pub use backend::{StoreConnection, StoreConnector};
pub use client::{StoreClient, StoredEntry};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pool::{ConnectionPool, PoolSettings, PooledConnection, ReleasePolicy};
