//! Store client: pooled, deadline-bounded session store operations.
//!
//! Every operation checks out one connection, runs under the command
//! deadline and hands the connection back through [`StoreClient::finish`],
//! which is the single place the keepalive-or-close decision is made.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{StoreConfig, StoreKind};
use crate::store::backend::StoreConnector;
use crate::store::error::{StoreError, StoreResult};
use crate::store::memory::MemoryStore;
use crate::store::pool::{ConnectionPool, PoolSettings, PooledConnection, ReleasePolicy};
use crate::store::redis::RedisConnector;

/// A key listed by a prefix scan, with its remaining TTL and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub ttl: Option<u64>,
    pub value: String,
}

/// Shared handle to the session store. Cheap to clone.
#[derive(Clone)]
pub struct StoreClient {
    pool: Arc<ConnectionPool>,
    command_timeout: Duration,
}

impl StoreClient {
    /// Build a client for the configured store kind.
    pub fn from_config(config: &StoreConfig) -> Self {
        let connector: Arc<dyn StoreConnector> = match config.kind {
            StoreKind::Redis => Arc::new(RedisConnector),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        };
        Self::with_connector(connector, config)
    }

    /// Build a client over an explicit connector.
    pub fn with_connector(connector: Arc<dyn StoreConnector>, config: &StoreConfig) -> Self {
        let pool = ConnectionPool::new(connector, PoolSettings::from(config));
        Self {
            pool: Arc::new(pool),
            command_timeout: config.command_timeout(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut lease = self.pool.acquire().await?;
        let result = self.bounded(lease.get(key)).await;
        self.finish(lease, result)
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut lease = self.pool.acquire().await?;
        let result = self.bounded(lease.set_with_ttl(key, value, ttl_secs)).await;
        self.finish(lease, result)
    }

    pub async fn expire_now(&self, key: &str) -> StoreResult<()> {
        let mut lease = self.pool.acquire().await?;
        let result = self.bounded(lease.expire_now(key)).await;
        self.finish(lease, result)
    }

    pub async fn del(&self, key: &str) -> StoreResult<u64> {
        let mut lease = self.pool.acquire().await?;
        let result = self.bounded(lease.del(key)).await;
        self.finish(lease, result)
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut lease = self.pool.acquire().await?;
        let result = self.bounded(lease.exists(key)).await;
        self.finish(lease, result)
    }

    pub async fn ttl(&self, key: &str) -> StoreResult<Option<u64>> {
        let mut lease = self.pool.acquire().await?;
        let result = self.bounded(lease.ttl(key)).await;
        self.finish(lease, result)
    }

    pub async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut lease = self.pool.acquire().await?;
        let result = self.bounded(lease.scan_prefix(prefix)).await;
        self.finish(lease, result)
    }

    pub async fn ping(&self) -> StoreResult<()> {
        let mut lease = self.pool.acquire().await?;
        let result = self.bounded(lease.ping()).await;
        self.finish(lease, result)
    }

    /// Overwrite `key` only if it already exists. Returns `false` when absent.
    ///
    /// Not atomic: a concurrent delete between the check and the write
    /// recreates the key.
    pub async fn update_existing(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<bool> {
        let mut lease = self.pool.acquire().await?;
        let result = async {
            if !self.bounded(lease.exists(key)).await? {
                return Ok(false);
            }
            self.bounded(lease.set_with_ttl(key, value, ttl_secs)).await?;
            Ok::<_, StoreError>(true)
        }
        .await;
        self.finish(lease, result)
    }

    /// Every live key under `prefix` with its TTL and value.
    ///
    /// Keys that expire between the scan and the read are skipped.
    pub async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<StoredEntry>> {
        let mut lease = self.pool.acquire().await?;
        let result = async {
            let keys = self.bounded(lease.scan_prefix(prefix)).await?;
            let mut entries = Vec::with_capacity(keys.len());
            for key in keys {
                let ttl = self.bounded(lease.ttl(&key)).await?;
                if let Some(value) = self.bounded(lease.get(&key)).await? {
                    entries.push(StoredEntry { key, ttl, value });
                }
            }
            Ok::<_, StoreError>(entries)
        }
        .await;
        self.finish(lease, result)
    }

    /// Close idle connections and refuse new checkouts.
    pub fn close(&self) {
        self.pool.close();
    }

    async fn bounded<T>(&self, op: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.command_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    fn finish<T>(&self, lease: PooledConnection, result: StoreResult<T>) -> StoreResult<T> {
        self.pool.release(lease, ReleasePolicy::for_outcome(&result));
        result
    }
}
