//! Store connection pool, built on `bb8`.
//!
//! # Responsibilities
//! - Open connections (connect, optional authenticate, optional database select)
//!   within the connect deadline
//! - Keep idle connections for reuse and reap them after the idle timeout
//! - Cap the number of open connections at `pool_size`
//!
//! # Design Decisions
//! - A lease is owned by exactly one task between `acquire` and `release`
//! - Every lease starts out broken; only `ReturnToPool` marks it clean, so a
//!   connection that errored, or whose command was cancelled, is discarded
//! - Credentials are authenticated once, when the connection is opened

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool, RunError};

use crate::config::StoreConfig;
use crate::observability::metrics;
use crate::store::backend::{StoreConnection, StoreConnector};
use crate::store::error::{StoreError, StoreResult};

/// What to do with a connection when a task is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Keep the connection for reuse (subject to idle timeout and pool size).
    ReturnToPool,
    /// Close the connection now.
    CloseImmediately,
}

impl ReleasePolicy {
    /// Successful operations return the connection; any error closes it.
    pub fn for_outcome<T>(result: &StoreResult<T>) -> Self {
        match result {
            Ok(_) => ReleasePolicy::ReturnToPool,
            Err(_) => ReleasePolicy::CloseImmediately,
        }
    }
}

/// Pool settings, resolved once from [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub endpoint: String,
    pub credential: Option<String>,
    pub database: Option<u8>,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub pool_size: usize,
}

impl From<&StoreConfig> for PoolSettings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            credential: config.credential().map(str::to_string),
            database: config.database,
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
            pool_size: config.pool_size,
        }
    }
}

/// A store connection as bb8 holds it.
pub struct ManagedConnection {
    conn: Box<dyn StoreConnection>,
    checkouts: u64,
    broken: bool,
}

/// `bb8` manager that opens connections through a [`StoreConnector`].
pub struct StoreManager {
    connector: Arc<dyn StoreConnector>,
    settings: PoolSettings,
}

impl ManageConnection for StoreManager {
    type Connection = ManagedConnection;
    type Error = StoreError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let mut conn = self
            .connector
            .connect(&self.settings.endpoint, self.settings.connect_timeout)
            .await?;

        if let Some(credential) = &self.settings.credential {
            if let Err(e) = conn.authenticate(credential).await {
                tracing::warn!(endpoint = %self.settings.endpoint, error = %e, "Store authentication failed");
                return Err(e);
            }
        }
        if let Some(database) = self.settings.database {
            conn.select(database).await?;
        }

        metrics::record_store_connection("opened");
        Ok(ManagedConnection {
            conn,
            checkouts: 0,
            broken: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.conn.ping().await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.broken
    }
}

/// A connection checked out of the pool.
///
/// Derefs to the underlying [`StoreConnection`]. Hand it back with
/// [`ConnectionPool::release`]; dropping it closes the connection.
pub struct PooledConnection {
    lease: bb8::PooledConnection<'static, StoreManager>,
}

impl PooledConnection {
    /// Whether this connection served an earlier checkout.
    pub fn is_reused(&self) -> bool {
        self.lease.checkouts > 1
    }
}

impl Deref for PooledConnection {
    type Target = dyn StoreConnection;

    fn deref(&self) -> &Self::Target {
        self.lease.conn.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.lease.conn.as_mut()
    }
}

/// Bounded pool of store connections.
pub struct ConnectionPool {
    inner: Pool<StoreManager>,
    settings: PoolSettings,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Build the pool without opening any connection yet. Needs a Tokio runtime.
    pub fn new(connector: Arc<dyn StoreConnector>, settings: PoolSettings) -> Self {
        let manager = StoreManager {
            connector,
            settings: settings.clone(),
        };
        let inner = Pool::builder()
            .max_size(u32::try_from(settings.pool_size).unwrap_or(u32::MAX))
            .connection_timeout(settings.connect_timeout)
            .idle_timeout(Some(settings.idle_timeout))
            .test_on_check_out(false)
            .retry_connection(false)
            .build_unchecked(manager);

        Self {
            inner,
            settings,
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Check out a connection, reusing an idle one when possible.
    ///
    /// Waiting for a free slot and opening a new connection share the
    /// connect deadline; exceeding it yields [`StoreError::Timeout`].
    pub async fn acquire(&self) -> StoreResult<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::PoolClosed);
        }

        let mut lease = self.inner.get_owned().await.map_err(|e| match e {
            RunError::User(e) => e,
            RunError::TimedOut => StoreError::Timeout,
        })?;

        lease.checkouts += 1;
        lease.broken = true;
        if lease.checkouts > 1 {
            metrics::record_store_connection("reused");
        }
        Ok(PooledConnection { lease })
    }

    /// Hand a connection back according to `policy`.
    pub fn release(&self, mut lease: PooledConnection, policy: ReleasePolicy) {
        match policy {
            ReleasePolicy::ReturnToPool if !self.closed.load(Ordering::Acquire) => {
                lease.lease.broken = false;
                metrics::record_store_connection("returned");
            }
            _ => metrics::record_store_connection("closed"),
        }
    }

    /// Number of idle connections currently pooled.
    pub fn idle_count(&self) -> usize {
        self.inner.state().idle_connections as usize
    }

    /// Number of connections currently checked out.
    pub fn active_count(&self) -> usize {
        let state = self.inner.state();
        state.connections.saturating_sub(state.idle_connections) as usize
    }

    /// Stop handing out connections. Leases released afterwards are closed;
    /// idle ones close when the last client handle goes away.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(idle = self.idle_count(), "Store pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connector that counts opens, closes and AUTH calls.
    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
        auths: AtomicUsize,
    }

    struct FakeConnector {
        counters: Arc<Counters>,
        password: Option<&'static str>,
        hang: bool,
    }

    impl FakeConnector {
        fn new() -> (Arc<Self>, Arc<Counters>) {
            Self::build(None, false)
        }

        fn build(password: Option<&'static str>, hang: bool) -> (Arc<Self>, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let connector = Arc::new(Self {
                counters: counters.clone(),
                password,
                hang,
            });
            (connector, counters)
        }
    }

    #[async_trait]
    impl StoreConnector for FakeConnector {
        async fn connect(&self, _endpoint: &str, _timeout: Duration) -> StoreResult<Box<dyn StoreConnection>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConnection {
                counters: self.counters.clone(),
                password: self.password,
            }))
        }
    }

    struct FakeConnection {
        counters: Arc<Counters>,
        password: Option<&'static str>,
    }

    impl Drop for FakeConnection {
        fn drop(&mut self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StoreConnection for FakeConnection {
        async fn authenticate(&mut self, credential: &str) -> StoreResult<()> {
            self.counters.auths.fetch_add(1, Ordering::SeqCst);
            if self.password == Some(credential) {
                Ok(())
            } else {
                Err(StoreError::Auth("WRONGPASS".into()))
            }
        }
        async fn select(&mut self, _database: u8) -> StoreResult<()> {
            Ok(())
        }
        async fn get(&mut self, _key: &str) -> StoreResult<Option<String>> {
            Ok(None)
        }
        async fn set_with_ttl(&mut self, _key: &str, _value: &str, _ttl: u64) -> StoreResult<()> {
            Ok(())
        }
        async fn expire_now(&mut self, _key: &str) -> StoreResult<()> {
            Ok(())
        }
        async fn del(&mut self, _key: &str) -> StoreResult<u64> {
            Ok(0)
        }
        async fn exists(&mut self, _key: &str) -> StoreResult<bool> {
            Ok(false)
        }
        async fn ttl(&mut self, _key: &str) -> StoreResult<Option<u64>> {
            Ok(None)
        }
        async fn scan_prefix(&mut self, _prefix: &str) -> StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn ping(&mut self) -> StoreResult<()> {
            Ok(())
        }
    }

    fn settings() -> PoolSettings {
        PoolSettings {
            endpoint: "fake:6379".into(),
            credential: None,
            database: None,
            connect_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(10),
            pool_size: 4,
        }
    }

    #[test]
    fn policy_follows_outcome() {
        assert_eq!(ReleasePolicy::for_outcome(&Ok(())), ReleasePolicy::ReturnToPool);
        assert_eq!(
            ReleasePolicy::for_outcome::<()>(&Err(StoreError::Timeout)),
            ReleasePolicy::CloseImmediately
        );
    }

    #[tokio::test]
    async fn returned_connection_is_reused() {
        let (connector, counters) = FakeConnector::new();
        let pool = ConnectionPool::new(connector, settings());

        let lease = pool.acquire().await.unwrap();
        assert!(!lease.is_reused());
        pool.release(lease, ReleasePolicy::ReturnToPool);
        assert_eq!(pool.idle_count(), 1);

        let lease = pool.acquire().await.unwrap();
        assert!(lease.is_reused());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
        pool.release(lease, ReleasePolicy::ReturnToPool);
    }

    #[tokio::test]
    async fn errored_connection_is_never_pooled() {
        let (connector, counters) = FakeConnector::new();
        let pool = ConnectionPool::new(connector, settings());

        let lease = pool.acquire().await.unwrap();
        pool.release(lease, ReleasePolicy::CloseImmediately);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

        let lease = pool.acquire().await.unwrap();
        assert!(!lease.is_reused());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        pool.release(lease, ReleasePolicy::ReturnToPool);
    }

    #[tokio::test]
    async fn dropped_lease_is_closed() {
        let (connector, counters) = FakeConnector::new();
        let pool = ConnectionPool::new(connector, settings());

        let lease = pool.acquire().await.unwrap();
        drop(lease);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn auth_runs_once_per_connection() {
        let (connector, counters) = FakeConnector::build(Some("secret"), false);
        let mut s = settings();
        s.credential = Some("secret".into());
        let pool = ConnectionPool::new(connector, s);

        for _ in 0..3 {
            let lease = pool.acquire().await.unwrap();
            pool.release(lease, ReleasePolicy::ReturnToPool);
        }
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.auths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failure_closes_connection() {
        let (connector, counters) = FakeConnector::build(Some("secret"), false);
        let mut s = settings();
        s.credential = Some("wrong".into());
        let pool = ConnectionPool::new(connector, s);

        assert!(pool.acquire().await.is_err());
        let opens = counters.opens.load(Ordering::SeqCst);
        assert!(opens >= 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), opens);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn no_credential_skips_auth() {
        let (connector, counters) = FakeConnector::build(Some("secret"), false);
        let pool = ConnectionPool::new(connector, settings());

        let lease = pool.acquire().await.unwrap();
        pool.release(lease, ReleasePolicy::ReturnToPool);
        assert_eq!(counters.auths.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_connect_times_out() {
        let (connector, _) = FakeConnector::build(None, true);
        let pool = ConnectionPool::new(connector, settings());

        let result = pool.acquire().await;
        assert!(matches!(result, Err(StoreError::Timeout)));
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_size_caps_open_connections() {
        let (connector, counters) = FakeConnector::new();
        let mut s = settings();
        s.pool_size = 1;
        let pool = ConnectionPool::new(connector, s);

        let held = pool.acquire().await.unwrap();
        assert!(matches!(pool.acquire().await, Err(StoreError::Timeout)));

        pool.release(held, ReleasePolicy::ReturnToPool);
        let lease = pool.acquire().await.unwrap();
        assert!(lease.is_reused());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkout() {
        let (connector, counters) = FakeConnector::new();
        let pool = ConnectionPool::new(connector, settings());

        let lease = pool.acquire().await.unwrap();
        pool.close();
        pool.release(lease, ReleasePolicy::ReturnToPool);

        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(pool.acquire().await, Err(StoreError::PoolClosed)));
    }
}
