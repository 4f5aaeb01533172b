//! The backend abstraction every typed store is written against.

use std::time::Duration;

use async_trait::async_trait;
use dp_domain::Result;

/// A Redis-shaped key-value backend: string values, per-key TTL, ordered
/// lists for append-only data. Concurrent writers are serialized per key by
/// the backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// `set` with a TTL; the key expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;

    /// Append to the tail of the list at `key` (ordered append).
    async fn push(&self, key: &str, value: &str) -> Result<()>;

    /// Inclusive range over the list at `key`; negative indices count from
    /// the tail (`range(key, 0, -1)` is the whole list, oldest first).
    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    async fn list_len(&self, key: &str) -> Result<usize>;
}
