//! The chat registry — per-chat runtime state and run lifecycle.
//!
//! Two maps, both keyed by chat id and shared behind locks:
//!
//! - **chat state**: credentials, output directory, last folded memory,
//!   loaded tool categories/skills, the read cache, the task board. This
//!   state must never live in task-local storage: the keepalive timer and
//!   any detached task read the same map, so mutations made anywhere are
//!   visible everywhere.
//! - **active runs**: at most one per chat. Starting a run while another is
//!   in flight cancels the predecessor (supersession) and waits a bounded
//!   grace period for it to wind down.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dp_domain::chat::{ChatMeta, Credentials};
use dp_domain::tool::ToolCategory;

use super::memory::Memory;
use super::tasks::TaskBoard;

/// Per-chat state that survives across runs within one process.
pub struct ChatState {
    pub chat_id: String,
    pub output_dir: PathBuf,
    pub credentials: Mutex<Credentials>,
    pub last_memory: Mutex<Option<Memory>>,
    pub loaded_categories: Mutex<BTreeSet<ToolCategory>>,
    pub loaded_skills: Mutex<Vec<String>>,
    /// Pinned context notes (attached URLs, plan artifacts).
    pub context_notes: Mutex<Vec<String>>,
    pub tasks: Mutex<TaskBoard>,
    /// `(entity_type, entity_id)` → last state seen; feeds pre-reads.
    pub read_cache: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl ChatState {
    fn new(chat_id: &str, output_dir: PathBuf, credentials: Credentials) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            output_dir,
            credentials: Mutex::new(credentials),
            last_memory: Mutex::new(None),
            loaded_categories: Mutex::new(BTreeSet::new()),
            loaded_skills: Mutex::new(Vec::new()),
            context_notes: Mutex::new(Vec::new()),
            tasks: Mutex::new(TaskBoard::default()),
            read_cache: Mutex::new(HashMap::new()),
        }
    }
}

struct ActiveRun {
    run_id: Uuid,
    cancel: CancellationToken,
    done_rx: watch::Receiver<bool>,
}

/// Owns chat states and enforces the one-active-run-per-chat invariant.
pub struct ChatRegistry {
    states: RwLock<HashMap<String, Arc<ChatState>>>,
    runs: Mutex<HashMap<String, ActiveRun>>,
    output_root: PathBuf,
    grace: std::time::Duration,
}

impl ChatRegistry {
    pub fn new(output_root: PathBuf, grace: std::time::Duration) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
            output_root,
            grace,
        }
    }

    /// Get or create the state for a chat, refreshing credentials either way.
    pub fn ensure_state(&self, meta: &ChatMeta, credentials: Credentials) -> Arc<ChatState> {
        if let Some(state) = self.states.read().get(&meta.chat_id) {
            *state.credentials.lock() = credentials;
            return state.clone();
        }
        let mut states = self.states.write();
        // Double-checked: another request may have won the race.
        if let Some(state) = states.get(&meta.chat_id) {
            *state.credentials.lock() = credentials;
            return state.clone();
        }
        let state = Arc::new(ChatState::new(
            &meta.chat_id,
            self.output_root.join(&meta.chat_id),
            credentials,
        ));
        states.insert(meta.chat_id.clone(), state.clone());
        state
    }

    pub fn state(&self, chat_id: &str) -> Option<Arc<ChatState>> {
        self.states.read().get(chat_id).cloned()
    }

    /// Begin a run for a chat. An in-flight predecessor is cancelled and
    /// given up to the grace period to wind down before the new run's
    /// guard is installed.
    pub async fn start_run(self: &Arc<Self>, chat_id: &str) -> RunGuard {
        let prior = self
            .runs
            .lock()
            .get(chat_id)
            .map(|r| (r.run_id, r.cancel.clone(), r.done_rx.clone()));

        if let Some((prior_id, cancel, mut done_rx)) = prior {
            tracing::info!(chat_id = %chat_id, superseded = %prior_id, "superseding in-flight run");
            cancel.cancel();
            let waited = tokio::time::timeout(self.grace, async {
                loop {
                    if *done_rx.borrow_and_update() {
                        break;
                    }
                    if done_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;
            if waited.is_err() {
                tracing::warn!(chat_id = %chat_id, "predecessor did not stop within grace period");
            }
        }

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.runs.lock().insert(
            chat_id.to_string(),
            ActiveRun {
                run_id,
                cancel: cancel.clone(),
                done_rx,
            },
        );

        RunGuard {
            registry: self.clone(),
            chat_id: chat_id.to_string(),
            run_id,
            cancel,
            done_tx,
        }
    }

    /// External cancellation (explicit endpoint or client disconnect).
    /// Returns whether a run was active.
    pub fn cancel_run(&self, chat_id: &str) -> bool {
        match self.runs.lock().get(chat_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, chat_id: &str) -> bool {
        self.runs.lock().contains_key(chat_id)
    }

    /// Cancel any active run and drop the in-process state.
    pub fn remove_chat(&self, chat_id: &str) {
        self.cancel_run(chat_id);
        self.states.write().remove(chat_id);
    }
}

/// Handle for one in-flight run. Dropping it signals completion to any
/// superseder waiting in `start_run` and vacates the active-run slot.
pub struct RunGuard {
    registry: Arc<ChatRegistry>,
    chat_id: String,
    pub run_id: Uuid,
    pub cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = self.done_tx.send(true);
        let mut runs = self.registry.runs.lock();
        if runs
            .get(&self.chat_id)
            .is_some_and(|r| r.run_id == self.run_id)
        {
            runs.remove(&self.chat_id);
        }
    }
}
