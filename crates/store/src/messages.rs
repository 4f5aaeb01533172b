//! Append-only per-chat transcript (`chat:{id}:msgs`).

use std::sync::Arc;

use dp_domain::message::ChatMessage;
use dp_domain::Result;

use crate::chats::msgs_key;
use crate::kv::KvStore;

pub struct MessageStore {
    kv: Arc<dyn KvStore>,
}

impl MessageStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn append(&self, chat_id: &str, message: &ChatMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.kv.push(&msgs_key(chat_id), &json).await
    }

    /// Full transcript, oldest first. Corrupt lines are skipped with a
    /// warning rather than poisoning the chat.
    pub async fn list(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let raw = self.kv.range(&msgs_key(chat_id), 0, -1).await?;
        let mut messages = Vec::with_capacity(raw.len());
        for line in raw {
            match serde_json::from_str(&line) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!(chat_id = %chat_id, error = %e, "skipping corrupt message")
                }
            }
        }
        Ok(messages)
    }

    pub async fn count(&self, chat_id: &str) -> Result<usize> {
        self.kv.list_len(&msgs_key(chat_id)).await
    }
}
