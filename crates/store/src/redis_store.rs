//! Redis backend on a multiplexed [`ConnectionManager`].

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use dp_domain::{Error, Result};

use crate::kv::KvStore;

/// A [`KvStore`] backed by Redis. The connection manager reconnects
/// transparently; command errors surface as [`Error::Store`].
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis://host:port/`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let manager = client.get_connection_manager().await.map_err(store_err)?;
        tracing::info!(url = %url, "redis store connected");
        Ok(Self { manager })
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        con.get(key).await.map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.set::<_, _, ()>(key, value).await.map_err(store_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut con = self.manager.clone();
        con.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(store_err)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.del::<_, ()>(key).await.map_err(store_err)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        // KEYS is O(n) over the keyspace; the chat keyspace here is small
        // and scoped by prefix.
        let mut con = self.manager.clone();
        let mut keys: Vec<String> = con
            .keys(format!("{prefix}*"))
            .await
            .map_err(store_err)?;
        keys.sort();
        Ok(keys)
    }

    async fn push(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.rpush::<_, _, ()>(key, value).await.map_err(store_err)
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        con.lrange(key, start, stop).await.map_err(store_err)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut con = self.manager.clone();
        con.llen(key).await.map_err(store_err)
    }
}
