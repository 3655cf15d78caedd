//! Store backend abstraction.
//!
//! The pool only knows how to open connections and run commands through
//! these traits, so its acquire/release discipline can be exercised
//! against an in-process store as well as a real Redis server.

use std::time::Duration;

use async_trait::async_trait;

use crate::store::error::StoreResult;

/// Opens new connections to the store.
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    /// Open a connection to `endpoint`, failing after `timeout`.
    async fn connect(&self, endpoint: &str, timeout: Duration) -> StoreResult<Box<dyn StoreConnection>>;
}

/// A single exclusive connection to the store.
#[async_trait]
pub trait StoreConnection: Send {
    async fn authenticate(&mut self, credential: &str) -> StoreResult<()>;

    /// Select a logical database.
    async fn select(&mut self, database: u8) -> StoreResult<()>;

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>>;

    /// Write `value` and re-arm the full TTL.
    async fn set_with_ttl(&mut self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    /// Expire the key immediately.
    async fn expire_now(&mut self, key: &str) -> StoreResult<()>;

    /// Delete the key, returning how many keys were removed.
    async fn del(&mut self, key: &str) -> StoreResult<u64>;

    async fn exists(&mut self, key: &str) -> StoreResult<bool>;

    /// Remaining TTL in seconds; `None` if the key is absent or has no expiry.
    async fn ttl(&mut self, key: &str) -> StoreResult<Option<u64>>;

    /// Every key starting with `prefix`.
    async fn scan_prefix(&mut self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn ping(&mut self) -> StoreResult<()>;
}
