//! Redis-backed store connections.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::store::backend::{StoreConnection, StoreConnector};
use crate::store::error::{StoreError, StoreResult};

/// Batch size hint passed to `SCAN`.
const SCAN_COUNT: u64 = 100;

/// Opens plain TCP connections to a Redis-compatible server.
#[derive(Debug, Default, Clone)]
pub struct RedisConnector;

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self, endpoint: &str, timeout: Duration) -> StoreResult<Box<dyn StoreConnection>> {
        let client = redis::Client::open(format!("redis://{}/", endpoint))
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        Ok(Box::new(RedisConnection { conn }))
    }
}

/// One exclusive connection, owned by a pool lease while in use.
pub struct RedisConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn authenticate(&mut self, credential: &str) -> StoreResult<()> {
        redis::cmd("AUTH")
            .arg(credential)
            .query_async::<()>(&mut self.conn)
            .await
            .map_err(|e| StoreError::Auth(e.to_string()))
    }

    async fn select(&mut self, database: u8) -> StoreResult<()> {
        redis::cmd("SELECT")
            .arg(database)
            .query_async::<()>(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn set_with_ttl(&mut self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<()>(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn expire_now(&mut self, key: &str) -> StoreResult<()> {
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(0)
            .query_async::<i64>(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn del(&mut self, key: &str) -> StoreResult<u64> {
        let removed = redis::cmd("DEL")
            .arg(key)
            .query_async::<u64>(&mut self.conn)
            .await?;
        Ok(removed)
    }

    async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        let count = redis::cmd("EXISTS")
            .arg(key)
            .query_async::<u64>(&mut self.conn)
            .await?;
        Ok(count > 0)
    }

    async fn ttl(&mut self, key: &str) -> StoreResult<Option<u64>> {
        // -2: no such key, -1: no expiry
        let ttl = redis::cmd("TTL")
            .arg(key)
            .query_async::<i64>(&mut self.conn)
            .await?;
        Ok(u64::try_from(ttl).ok())
    }

    async fn scan_prefix(&mut self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async::<(u64, Vec<String>)>(&mut self.conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once across batches
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&mut self) -> StoreResult<()> {
        redis::cmd("PING")
            .query_async::<String>(&mut self.conn)
            .await?;
        Ok(())
    }
}

/// Escape glob metacharacters so the prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
