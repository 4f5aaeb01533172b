//! Configuration commits — the append-only record of platform writes.
//!
//! A commit captures the ordered entity-level changes produced by one agent
//! iteration. The hash is content-addressed over the change tuples, so two
//! identical change sets collide on purpose and an empty change set is not
//! committable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One entity-level change inside a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChange {
    pub entity_type: String,
    pub entity_id: String,
    /// `null` for creations.
    pub before: serde_json::Value,
    /// `null` for deletions.
    pub after: serde_json::Value,
}

/// An atomic record of one or more entity writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigCommit {
    pub hash: String,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
    /// Tool that produced the mutation (e.g. `patch_queue`).
    pub author: String,
    /// Human-readable summary, model-generated.
    pub message: String,
    pub changes: Vec<EntityChange>,
}

impl ConfigCommit {
    pub fn new(chat_id: &str, author: &str, message: String, changes: Vec<EntityChange>) -> Self {
        Self {
            hash: commit_hash(&changes),
            chat_id: chat_id.to_string(),
            created_at: Utc::now(),
            author: author.to_string(),
            message,
            changes,
        }
    }

    pub fn summary(&self) -> CommitSummary {
        CommitSummary {
            hash: self.hash.clone(),
            message: self.message.clone(),
            change_count: self.changes.len(),
        }
    }
}

/// The slice of a commit that rides on the `done` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSummary {
    pub hash: String,
    pub message: String,
    pub change_count: usize,
}

/// Content hash over the ordered `(entity_type, entity_id, before, after)`
/// tuples. Serialization order inside `before`/`after` objects is made
/// canonical by serde_json's map ordering of the parsed values.
pub fn commit_hash(changes: &[EntityChange]) -> String {
    let mut hasher = Sha256::new();
    for change in changes {
        hasher.update(change.entity_type.as_bytes());
        hasher.update([0]);
        hasher.update(change.entity_id.as_bytes());
        hasher.update([0]);
        hasher.update(change.before.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(change.after.to_string().as_bytes());
        hasher.update([0]);
    }
    hex::encode(&hasher.finalize()[..16])
}

/// Key for the snapshot store: `snap:{entity_type}:{entity_id}:{hash}`.
pub fn snapshot_key(entity_type: &str, entity_id: &str, commit_hash: &str) -> String {
    format!("snap:{entity_type}:{entity_id}:{commit_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(id: &str) -> EntityChange {
        EntityChange {
            entity_type: "queue".into(),
            entity_id: id.into(),
            before: json!({"name": "old"}),
            after: json!({"name": "new"}),
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let a = commit_hash(&[change("1"), change("2")]);
        let b = commit_hash(&[change("1"), change("2")]);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_depends_on_order() {
        let a = commit_hash(&[change("1"), change("2")]);
        let b = commit_hash(&[change("2"), change("1")]);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_depends_on_content() {
        let mut c = change("1");
        let a = commit_hash(&[c.clone()]);
        c.after = json!({"name": "other"});
        let b = commit_hash(&[c]);
        assert_ne!(a, b);
    }

    #[test]
    fn commit_roundtrip_is_lossless() {
        let commit = ConfigCommit::new(
            "chat-1",
            "patch_queue",
            "Renamed queue".into(),
            vec![change("1")],
        );
        let json = serde_json::to_string(&commit).unwrap();
        let back: ConfigCommit = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hash, commit.hash);
        assert_eq!(back.changes, commit.changes);
        assert_eq!(back.message, commit.message);
    }

    #[test]
    fn snapshot_key_layout() {
        assert_eq!(snapshot_key("queue", "42", "abc"), "snap:queue:42:abc");
    }
}
