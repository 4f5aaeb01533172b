//! Entity snapshot store — point-in-time state keyed by
//! `(entity_type, entity_id, commit_hash)`, expiring after the retention
//! window (7 days by default).

use std::sync::Arc;
use std::time::Duration;

use dp_domain::commit::snapshot_key;
use dp_domain::{Error, Result};

use crate::kv::KvStore;

pub struct SnapshotStore {
    kv: Arc<dyn KvStore>,
    retention: Duration,
}

impl SnapshotStore {
    pub fn new(kv: Arc<dyn KvStore>, retention: Duration) -> Self {
        Self { kv, retention }
    }

    pub async fn put(
        &self,
        entity_type: &str,
        entity_id: &str,
        commit_hash: &str,
        state: &serde_json::Value,
    ) -> Result<()> {
        let key = snapshot_key(entity_type, entity_id, commit_hash);
        self.kv
            .set_ex(&key, &state.to_string(), self.retention)
            .await
    }

    pub async fn get(
        &self,
        entity_type: &str,
        entity_id: &str,
        commit_hash: &str,
    ) -> Result<Option<serde_json::Value>> {
        let key = snapshot_key(entity_type, entity_id, commit_hash);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("corrupt snapshot {key}: {e}")))?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let snaps = SnapshotStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        let state = json!({"id": "q1", "name": "Inbox"});
        snaps.put("queue", "q1", "abc", &state).await.unwrap();
        assert_eq!(snaps.get("queue", "q1", "abc").await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn expired_snapshot_is_gone() {
        let snaps = SnapshotStore::new(Arc::new(MemoryStore::new()), Duration::from_millis(5));
        snaps.put("queue", "q1", "abc", &json!(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(snaps.get("queue", "q1", "abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn distinct_commits_keep_distinct_snapshots() {
        let snaps = SnapshotStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        snaps.put("queue", "q1", "h1", &json!({"v": 1})).await.unwrap();
        snaps.put("queue", "q1", "h2", &json!({"v": 2})).await.unwrap();
        assert_eq!(
            snaps.get("queue", "q1", "h1").await.unwrap(),
            Some(json!({"v": 1}))
        );
        assert_eq!(
            snaps.get("queue", "q1", "h2").await.unwrap(),
            Some(json!({"v": 2}))
        );
    }
}
