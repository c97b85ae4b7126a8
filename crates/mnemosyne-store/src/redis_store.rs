//! Redis record store.
//!
//! Records are encoded with [`crate::codec`] and written with a millisecond
//! TTL, so Redis expires them natively. Creation uses `SET NX`, which makes
//! the first writer win across every replica sharing the deployment.

use std::time::Duration;

use mnemosyne_core::{BoxFuture, IdempotencyStore, Record, StoreError};
use redis::aio::ConnectionManager;

use crate::codec;

const BACKEND: &str = "redis";

/// Idempotency store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
}

impl RedisStore {
    /// Connects to `url` and returns a store whose keys are namespaced by `key_prefix`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(
        url: &str,
        key_prefix: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        let key_prefix = key_prefix.into();
        tracing::info!(prefix = %key_prefix, ttl_ms = ttl_millis(ttl), "connected to redis store");
        Ok(Self {
            conn,
            key_prefix,
            ttl,
        })
    }

    /// Returns the Redis key used for an idempotency key.
    #[must_use]
    pub fn storage_key(&self, key: &str) -> String {
        storage_key(&self.key_prefix, key)
    }

    async fn fetch(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let storage_key = self.storage_key(key);
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&storage_key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        raw.map(|bytes| {
            codec::decode(&bytes).map_err(|e| StoreError::corrupt(storage_key.clone(), e.to_string()))
        })
        .transpose()
    }

    async fn write(&self, key: &str, record: &Record, only_if_absent: bool) -> Result<bool, StoreError> {
        let storage_key = self.storage_key(key);
        let payload = codec::encode(record)
            .map_err(|e| StoreError::corrupt(storage_key.clone(), e.to_string()))?;
        let mut conn = self.conn.clone();

        let cmd = set_command(&storage_key, &payload, self.ttl, only_if_absent);
        if only_if_absent {
            // Nil when the key already exists.
            let created: bool = cmd.query_async(&mut conn).await.map_err(unavailable)?;
            Ok(created)
        } else {
            let () = cmd.query_async(&mut conn).await.map_err(unavailable)?;
            Ok(true)
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _removed: i64 = delete_command(&self.storage_key(key))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl IdempotencyStore for RedisStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Record>, StoreError>> {
        Box::pin(self.fetch(key))
    }

    fn set<'a>(&'a self, key: &'a str, record: &'a Record) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { self.write(key, record, false).await.map(|_| ()) })
    }

    fn insert_if_absent<'a>(
        &'a self,
        key: &'a str,
        record: &'a Record,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(self.write(key, record, true))
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.delete(key))
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::unavailable(BACKEND, err.to_string())
}

fn storage_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

/// Redis rejects `PX 0`, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn set_command(storage_key: &str, payload: &[u8], ttl: Duration, only_if_absent: bool) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(storage_key).arg(payload);
    if only_if_absent {
        cmd.arg("NX");
    }
    cmd.arg("PX").arg(ttl_millis(ttl));
    cmd
}

fn delete_command(storage_key: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("DEL");
    cmd.arg(storage_key);
    cmd
}
