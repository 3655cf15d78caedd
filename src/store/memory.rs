//! Process-local store with TTL semantics.
//!
//! Selected with `store.kind = "memory"`. Keys expire lazily on access;
//! there is no sweeper, matching the store-owns-expiry contract.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::store::backend::{StoreConnection, StoreConnector};
use crate::store::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Shared {
    data: DashMap<String, Entry>,
    password: Option<String>,
    offline: AtomicBool,
    connects: AtomicU64,
}

/// In-memory store. Clones share the same keyspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects connections which do not authenticate with `password`.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Shared {
                password: Some(password.into()),
                ..Default::default()
            }),
        }
    }

    /// Simulate an outage: new connections and in-flight commands fail.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of connections opened so far.
    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Read a live value directly, bypassing the pool.
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.inner
            .data
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    /// Remaining TTL for a live key, bypassing the pool.
    pub fn peek_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.inner
            .data
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.inner.data.get(key).map(|e| e.value().clone())?;
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.inner.data.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StoreError::Connect("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(&self, _endpoint: &str, _timeout: Duration) -> StoreResult<Box<dyn StoreConnection>> {
        self.check_online()?;
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            authenticated: self.inner.password.is_none(),
        }))
    }
}

/// A connection to a [`MemoryStore`].
pub struct MemoryConnection {
    store: MemoryStore,
    authenticated: bool,
}

impl MemoryConnection {
    fn ready(&self) -> StoreResult<()> {
        self.store.check_online()?;
        if self.authenticated {
            Ok(())
        } else {
            Err(StoreError::Command("NOAUTH Authentication required".to_string()))
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn authenticate(&mut self, credential: &str) -> StoreResult<()> {
        self.store.check_online()?;
        match &self.store.inner.password {
            Some(expected) if expected == credential => {
                self.authenticated = true;
                Ok(())
            }
            Some(_) => Err(StoreError::Auth("invalid password".to_string())),
            None => Err(StoreError::Auth("no password is set".to_string())),
        }
    }

    async fn select(&mut self, _database: u8) -> StoreResult<()> {
        self.ready()
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        self.ready()?;
        Ok(self.store.live_entry(key).map(|e| e.value))
    }

    async fn set_with_ttl(&mut self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.ready()?;
        self.store.inner.data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn expire_now(&mut self, key: &str) -> StoreResult<()> {
        self.ready()?;
        self.store.inner.data.remove(key);
        Ok(())
    }

    async fn del(&mut self, key: &str) -> StoreResult<u64> {
        self.ready()?;
        let removed = self.store.live_entry(key).is_some() && self.store.inner.data.remove(key).is_some();
        Ok(u64::from(removed))
    }

    async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        self.ready()?;
        Ok(self.store.live_entry(key).is_some())
    }

    async fn ttl(&mut self, key: &str) -> StoreResult<Option<u64>> {
        self.ready()?;
        let now = Instant::now();
        Ok(self
            .store
            .live_entry(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now).as_secs()))
    }

    async fn scan_prefix(&mut self, prefix: &str) -> StoreResult<Vec<String>> {
        self.ready()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .store
            .inner
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&mut self) -> StoreResult<()> {
        self.ready()
    }
}
