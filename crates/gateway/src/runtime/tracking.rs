//! Change tracking — the middleware around every platform tool call.
//!
//! Reads populate a per-chat cache; writes are bracketed by a pre-read
//! (cache-first) and a post-read so each produces an `EntityChange`. When
//! an iteration finishes with at least one change the loop turns the set
//! into a [`ConfigCommit`]. Revert replays a commit's before-states as a
//! new forward commit through the same retry discipline.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use dp_domain::commit::{CommitSummary, ConfigCommit, EntityChange};
use dp_domain::{Error, Result};
use dp_platform::catalog::{self, Operation, ResourceSpec};
use dp_platform::{retry, PlatformApi, PlatformError, PlatformResult};
use dp_store::{CommitLog, SnapshotStore};

use super::registry::ChatState;

pub struct ChangeTracker {
    chat: Arc<ChatState>,
    /// Tracking is active only in read-write mode.
    enabled: bool,
    pending: Mutex<Vec<(String, EntityChange)>>,
    /// Most recent commit of this run (tracker-built or revert), carried
    /// onto the `done` event.
    last_commit: Mutex<Option<CommitSummary>>,
}

impl ChangeTracker {
    pub fn new(chat: Arc<ChatState>, enabled: bool) -> Self {
        Self {
            chat,
            enabled,
            pending: Mutex::new(Vec::new()),
            last_commit: Mutex::new(None),
        }
    }

    /// Cache a read result for later pre-reads.
    pub fn note_read(&self, entity_type: &str, entity_id: &str, state: &Value) {
        if !self.enabled {
            return;
        }
        self.chat
            .read_cache
            .lock()
            .insert((entity_type.to_string(), entity_id.to_string()), state.clone());
    }

    fn cached(&self, entity_type: &str, entity_id: &str) -> Option<Value> {
        self.chat
            .read_cache
            .lock()
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned()
    }

    /// Pre-read for a write: cache hit, else a fresh retrieve. A missing
    /// entity reads as `null` (creation).
    async fn before_state(
        &self,
        api: &dyn PlatformApi,
        spec: &ResourceSpec,
        entity_id: &str,
    ) -> PlatformResult<Value> {
        if let Some(cached) = self.cached(spec.singular, entity_id) {
            return Ok(cached);
        }
        match api.retrieve(spec.plural, entity_id).await {
            Ok(state) => Ok(state),
            Err(PlatformError::NotFound(_)) => Ok(Value::Null),
            Err(e) => Err(e),
        }
    }

    /// Execute a write operation with the pre-read/post-read bracket and
    /// record the resulting change.
    pub async fn tracked_write(
        &self,
        api: &dyn PlatformApi,
        op: Operation,
        spec: &ResourceSpec,
        tool_name: &str,
        args: &Value,
    ) -> PlatformResult<Value> {
        debug_assert!(op.is_write());

        let (entity_id, before, after, result) = match op {
            Operation::Create => {
                let data = args.get("data").cloned().unwrap_or(Value::Null);
                let created = retry::create_with_retry(api, spec.plural, &data).await?;
                let id = entity_id_of(&created).unwrap_or_default();
                (id, Value::Null, created.clone(), created)
            }
            Operation::Patch => {
                let id = required_id(args)?;
                let data = args.get("data").cloned().unwrap_or(Value::Null);
                let before = self.before_state(api, spec, &id).await?;
                let patched = retry::patch_with_refresh(api, spec.plural, &id, &data).await?;
                // Post-read: the patch response is the fresh state when the
                // platform returns one; otherwise fetch it.
                let after = if patched.is_null() {
                    api.retrieve(spec.plural, &id).await?
                } else {
                    patched.clone()
                };
                (id, before, after.clone(), after)
            }
            Operation::Delete => {
                let id = required_id(args)?;
                let before = self.before_state(api, spec, &id).await?;
                retry::delete_with_retry(api, spec.plural, &id).await?;
                (
                    id,
                    before,
                    Value::Null,
                    serde_json::json!({ "deleted": true }),
                )
            }
            _ => unreachable!("tracked_write is only called for writes"),
        };

        let change = EntityChange {
            entity_type: spec.singular.to_string(),
            entity_id: entity_id.clone(),
            before,
            after: after.clone(),
        };

        if self.enabled {
            // Keep the cache current so a follow-up write in the same chat
            // pre-reads the state we just produced.
            let mut cache = self.chat.read_cache.lock();
            let key = (spec.singular.to_string(), entity_id);
            if after.is_null() {
                cache.remove(&key);
            } else {
                cache.insert(key, after);
            }
            self.pending
                .lock()
                .push((tool_name.to_string(), change));
        }

        Ok(result)
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Drain the pending changes: `(author, ordered changes)`. The author
    /// is the tool that produced the first change, the common case being a
    /// single-tool iteration.
    pub fn take_changes(&self) -> Option<(String, Vec<EntityChange>)> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return None;
        }
        let author = pending[0].0.clone();
        let changes = pending.drain(..).map(|(_, c)| c).collect();
        Some((author, changes))
    }

    /// Drop uncommitted changes (cancellation path: no partial commit).
    pub fn discard(&self) {
        self.pending.lock().clear();
    }

    pub fn set_last_commit(&self, summary: CommitSummary) {
        *self.last_commit.lock() = Some(summary);
    }

    pub fn take_last_commit(&self) -> Option<CommitSummary> {
        self.last_commit.lock().take()
    }
}

fn required_id(args: &Value) -> PlatformResult<String> {
    match args.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PlatformError::Client {
            status: 400,
            body: "missing required argument: id".into(),
        }),
    }
}

fn entity_id_of(entity: &Value) -> Option<String> {
    match entity.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commit production & revert
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persist a commit and its post-write snapshots. Every touched entity
/// gets a snapshot, deletions included — a `null` snapshot records "gone
/// at this commit" so point-in-time restore never re-derives from the
/// commit chain.
pub async fn persist_commit(
    commits: &CommitLog,
    snapshots: &SnapshotStore,
    commit: &ConfigCommit,
) -> Result<()> {
    commits.append(commit).await?;
    for change in &commit.changes {
        snapshots
            .put(
                &change.entity_type,
                &change.entity_id,
                &commit.hash,
                &change.after,
            )
            .await?;
    }
    Ok(())
}

/// Revert a commit by producing a new forward commit whose after-state is
/// the target's before-state. Current remote state is fetched first; the
/// restore is applied with the standard fetch-then-patch retry, so an
/// entity modified outside the tracked chain is overwritten, not blocked.
pub async fn revert_commit(
    api: &dyn PlatformApi,
    commits: &CommitLog,
    snapshots: &SnapshotStore,
    chat_id: &str,
    target_hash: &str,
) -> Result<ConfigCommit> {
    let target = commits.require(target_hash).await?;

    let mut changes = Vec::with_capacity(target.changes.len());
    // Undo in reverse order so dependent entities restore cleanly.
    for change in target.changes.iter().rev() {
        let spec = catalog::spec_for_entity(&change.entity_type).ok_or_else(|| {
            Error::Invariant(format!("commit references unknown entity type {}", change.entity_type))
        })?;
        let desired = &change.before;

        let current = match api.retrieve(spec.plural, &change.entity_id).await {
            Ok(state) => state,
            Err(PlatformError::NotFound(_)) => Value::Null,
            Err(e) => return Err(Error::Http(e.to_string())),
        };

        if current == *desired {
            // Already in the target state; nothing to replay.
            continue;
        }

        let after = if desired.is_null() {
            // The commit created this entity; revert deletes it.
            retry::delete_with_retry(api, spec.plural, &change.entity_id)
                .await
                .map_err(|e| Error::Http(e.to_string()))?;
            Value::Null
        } else if current.is_null() {
            // Deleted since (or by the commit); recreate the before-state.
            retry::create_with_retry(api, spec.plural, desired)
                .await
                .map_err(|e| Error::Http(e.to_string()))?
        } else {
            retry::patch_with_refresh(api, spec.plural, &change.entity_id, desired)
                .await
                .map_err(|e| Error::Http(e.to_string()))?
        };

        changes.push(EntityChange {
            entity_type: change.entity_type.clone(),
            entity_id: change.entity_id.clone(),
            before: current,
            after,
        });
    }

    let short = &target.hash[..8.min(target.hash.len())];
    let revert = ConfigCommit::new(
        chat_id,
        "revert_commit",
        format!("Revert {short}: {}", target.message),
        changes,
    );
    persist_commit(commits, snapshots, &revert).await?;
    Ok(revert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_id_accepts_string_and_number() {
        assert_eq!(required_id(&json!({"id": "q1"})).unwrap(), "q1");
        assert_eq!(required_id(&json!({"id": 42})).unwrap(), "42");
        assert!(required_id(&json!({})).is_err());
        assert!(required_id(&json!({"id": ""})).is_err());
    }

    #[test]
    fn entity_id_of_handles_shapes() {
        assert_eq!(entity_id_of(&json!({"id": "a"})).as_deref(), Some("a"));
        assert_eq!(entity_id_of(&json!({"id": 7})).as_deref(), Some("7"));
        assert_eq!(entity_id_of(&json!({})), None);
    }
}
