//! Chat metadata store (`chat:{id}`).

use std::sync::Arc;
use std::time::Duration;

use dp_domain::chat::ChatMeta;
use dp_domain::{Error, Result};

use crate::kv::KvStore;

pub struct ChatStore {
    kv: Arc<dyn KvStore>,
    /// TTL applied to chat keys; `None` keeps them until explicit delete.
    ttl: Option<Duration>,
}

fn meta_key(chat_id: &str) -> String {
    format!("chat:{chat_id}")
}

pub(crate) fn msgs_key(chat_id: &str) -> String {
    format!("chat:{chat_id}:msgs")
}

pub(crate) fn commits_key(chat_id: &str) -> String {
    format!("chat:{chat_id}:commits")
}

impl ChatStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self { kv, ttl }
    }

    pub async fn put(&self, meta: &ChatMeta) -> Result<()> {
        let json = serde_json::to_string(meta)?;
        let key = meta_key(&meta.chat_id);
        match self.ttl {
            Some(ttl) => self.kv.set_ex(&key, &json, ttl).await,
            None => self.kv.set(&key, &json).await,
        }
    }

    pub async fn get(&self, chat_id: &str) -> Result<Option<ChatMeta>> {
        let Some(raw) = self.kv.get(&meta_key(chat_id)).await? else {
            return Ok(None);
        };
        let meta = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("corrupt chat meta {chat_id}: {e}")))?;
        Ok(Some(meta))
    }

    /// Fetch or fail with `UnknownChat`.
    pub async fn require(&self, chat_id: &str) -> Result<ChatMeta> {
        self.get(chat_id)
            .await?
            .ok_or_else(|| Error::UnknownChat(chat_id.to_string()))
    }

    /// Remove the chat and its transcript/commit lists.
    pub async fn delete(&self, chat_id: &str) -> Result<()> {
        self.kv.del(&meta_key(chat_id)).await?;
        self.kv.del(&msgs_key(chat_id)).await?;
        self.kv.del(&commits_key(chat_id)).await?;
        Ok(())
    }

    /// List chats most-recent-first. Returns `(page, total)`.
    pub async fn list(&self, limit: usize, offset: usize) -> Result<(Vec<ChatMeta>, usize)> {
        let keys = self.kv.scan("chat:").await?;
        let mut metas = Vec::new();
        for key in keys {
            // Skip the `:msgs` / `:commits` companions.
            if key["chat:".len()..].contains(':') {
                continue;
            }
            if let Some(raw) = self.kv.get(&key).await? {
                match serde_json::from_str::<ChatMeta>(&raw) {
                    Ok(meta) => metas.push(meta),
                    Err(e) => tracing::warn!(key = %key, error = %e, "skipping corrupt chat meta"),
                }
            }
        }
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = metas.len();
        let page = metas.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use dp_domain::chat::{ChatMode, Persona};

    fn store() -> ChatStore {
        ChatStore::new(Arc::new(MemoryStore::new()), None)
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let chats = store();
        let meta = ChatMeta::new(ChatMode::ReadWrite, Persona::Cautious);
        chats.put(&meta).await.unwrap();
        let back = chats.get(&meta.chat_id).await.unwrap().unwrap();
        assert_eq!(back.chat_id, meta.chat_id);
        assert_eq!(back.mode, ChatMode::ReadWrite);
        assert_eq!(back.persona, Persona::Cautious);
    }

    #[tokio::test]
    async fn require_unknown_is_typed_error() {
        let chats = store();
        let err = chats.require("missing").await.unwrap_err();
        assert!(matches!(err, Error::UnknownChat(_)));
    }

    #[tokio::test]
    async fn list_pages_most_recent_first() {
        let chats = store();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut meta = ChatMeta::new(ChatMode::ReadOnly, Persona::Default);
            meta.created_at = chrono::Utc::now() + chrono::Duration::seconds(ids.len() as i64);
            chats.put(&meta).await.unwrap();
            ids.push(meta.chat_id);
        }
        let (page, total) = chats.list(2, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        // Newest (last created) first.
        assert_eq!(page[0].chat_id, ids[2]);

        let (rest, _) = chats.list(2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].chat_id, ids[0]);
    }

    #[tokio::test]
    async fn delete_removes_companion_keys() {
        let kv = Arc::new(MemoryStore::new());
        let chats = ChatStore::new(kv.clone(), None);
        let meta = ChatMeta::new(ChatMode::ReadOnly, Persona::Default);
        chats.put(&meta).await.unwrap();
        kv.push(&msgs_key(&meta.chat_id), "{}").await.unwrap();
        chats.delete(&meta.chat_id).await.unwrap();
        assert!(chats.get(&meta.chat_id).await.unwrap().is_none());
        assert_eq!(kv.list_len(&msgs_key(&meta.chat_id)).await.unwrap(), 0);
    }
}
