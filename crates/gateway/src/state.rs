use std::sync::Arc;

use dp_domain::config::Config;
use dp_platform::PlatformFactory;
use dp_providers::LlmProvider;
use dp_store::{ChatStore, CommitLog, KvStore, MessageStore, SnapshotStore};

use crate::knowledge::KnowledgeBase;
use crate::runtime::registry::ChatRegistry;
use crate::skills::SkillLibrary;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, LLM provider, platform factory
/// - **Persistence** — chat/message/commit/snapshot stores
/// - **Runtime** — the chat registry (run state, supersession, cancellation)
/// - **Context** — skills and knowledge base
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<dyn LlmProvider>,
    pub platform: Arc<dyn PlatformFactory>,

    // ── Persistence ───────────────────────────────────────────────────
    pub chats: Arc<ChatStore>,
    pub messages: Arc<MessageStore>,
    pub commits: Arc<CommitLog>,
    pub snapshots: Arc<SnapshotStore>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub registry: Arc<ChatRegistry>,

    // ── Context ───────────────────────────────────────────────────────
    pub skills: Arc<SkillLibrary>,
    pub knowledge: Arc<KnowledgeBase>,
}

impl AppState {
    /// Wire the state from its injectable parts. Tests substitute stub
    /// providers/factories and the in-memory store.
    pub fn build(
        config: Arc<Config>,
        llm: Arc<dyn LlmProvider>,
        kv: Arc<dyn KvStore>,
        platform: Arc<dyn PlatformFactory>,
    ) -> Self {
        let chat_ttl = (config.runtime.chat_ttl_days > 0).then(|| {
            std::time::Duration::from_secs(config.runtime.chat_ttl_days * 24 * 3600)
        });
        let snapshot_ttl =
            std::time::Duration::from_secs(config.runtime.snapshot_ttl_days * 24 * 3600);

        let registry = Arc::new(ChatRegistry::new(
            config.paths.output_root.clone(),
            std::time::Duration::from_millis(config.runtime.supersede_grace_ms),
        ));

        let skills = Arc::new(SkillLibrary::load(&config.paths.skills_dir));
        let knowledge = Arc::new(KnowledgeBase::load(&config.paths.knowledge_dir));

        Self {
            config,
            llm,
            platform,
            chats: Arc::new(ChatStore::new(kv.clone(), chat_ttl)),
            messages: Arc::new(MessageStore::new(kv.clone())),
            commits: Arc::new(CommitLog::new(kv.clone())),
            snapshots: Arc::new(SnapshotStore::new(kv, snapshot_ttl)),
            registry,
            skills,
            knowledge,
        }
    }
}
