//! Per-chat config-commit log.
//!
//! Two key families: the commit blob (`commit:{hash}`) and the per-chat
//! ordered hash list (`chat:{id}:commits`). Commits are append-only; revert
//! appends a new forward commit.

use std::sync::Arc;

use dp_domain::commit::ConfigCommit;
use dp_domain::{Error, Result};

use crate::chats::commits_key;
use crate::kv::KvStore;

pub struct CommitLog {
    kv: Arc<dyn KvStore>,
}

fn commit_key(hash: &str) -> String {
    format!("commit:{hash}")
}

impl CommitLog {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn append(&self, commit: &ConfigCommit) -> Result<()> {
        let json = serde_json::to_string(commit)?;
        self.kv.set(&commit_key(&commit.hash), &json).await?;
        self.kv
            .push(&commits_key(&commit.chat_id), &commit.hash)
            .await?;
        tracing::info!(
            chat_id = %commit.chat_id,
            hash = %commit.hash,
            changes = commit.changes.len(),
            "config commit recorded"
        );
        Ok(())
    }

    pub async fn get(&self, hash: &str) -> Result<Option<ConfigCommit>> {
        let Some(raw) = self.kv.get(&commit_key(hash)).await? else {
            return Ok(None);
        };
        let commit = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("corrupt commit {hash}: {e}")))?;
        Ok(Some(commit))
    }

    pub async fn require(&self, hash: &str) -> Result<ConfigCommit> {
        self.get(hash)
            .await?
            .ok_or_else(|| Error::Store(format!("commit not found: {hash}")))
    }

    /// All commits for a chat, most recent first. Hashes whose blob has
    /// vanished are skipped.
    pub async fn list_for_chat(&self, chat_id: &str) -> Result<Vec<ConfigCommit>> {
        let hashes = self.kv.range(&commits_key(chat_id), 0, -1).await?;
        let mut commits = Vec::with_capacity(hashes.len());
        for hash in hashes.iter().rev() {
            if let Some(commit) = self.get(hash).await? {
                commits.push(commit);
            }
        }
        Ok(commits)
    }
}
