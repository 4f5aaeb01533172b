//! In-memory backend for tests and credential-less local runs.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use dp_domain::Result;

use crate::kv::KvStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// A [`KvStore`] held entirely in process memory. TTLs are enforced lazily
/// on access.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(e) => Ok(Some(e.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        self.lists.lock().remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| !e.expired());
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.extend(
            self.lists
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned(),
        );
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn push(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let lists = self.lists.lock();
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let from = norm(start) as usize;
        let to = (norm(stop) + 1).min(len) as usize;
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(list[from..to].to_vec())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        Ok(self.lists.lock().get(key).map_or(0, Vec::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires() {
        let store = MemoryStore::new();
        store
            .set_ex("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_matches_prefix_only() {
        let store = MemoryStore::new();
        store.set("chat:a", "1").await.unwrap();
        store.set("chat:b", "2").await.unwrap();
        store.set("commit:x", "3").await.unwrap();
        let keys = store.scan("chat:").await.unwrap();
        assert_eq!(keys, vec!["chat:a", "chat:b"]);
    }

    #[tokio::test]
    async fn push_preserves_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.push("l", &i.to_string()).await.unwrap();
        }
        let all = store.range("l", 0, -1).await.unwrap();
        assert_eq!(all, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(store.list_len("l").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn range_with_negative_bounds() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store.push("l", &i.to_string()).await.unwrap();
        }
        assert_eq!(store.range("l", -2, -1).await.unwrap(), vec!["2", "3"]);
        assert_eq!(store.range("l", 1, 2).await.unwrap(), vec!["1", "2"]);
        assert!(store.range("l", 3, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn range_on_missing_key_is_empty() {
        let store = MemoryStore::new();
        assert!(store.range("nope", 0, -1).await.unwrap().is_empty());
    }
}
