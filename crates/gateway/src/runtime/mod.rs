//! The agent runtime — everything between an accepted message and its SSE
//! stream: run registry, the model↔tool loop, tool dispatch, sub-agents,
//! change tracking, and memory folding.

pub mod agent_loop;
pub mod builtins;
pub mod events;
pub mod memory;
pub mod prompt;
pub mod registry;
pub mod subagent;
pub mod tasks;
pub mod tools;
pub mod tracking;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use dp_domain::chat::{ChatMode, Persona};
use dp_domain::step::TokenBreakdown;
use dp_platform::PlatformApi;

use crate::state::AppState;
use events::EventSink;
use registry::ChatState;
use tracking::ChangeTracker;

/// Everything a dispatcher needs for the current run, built once per
/// message. Cloned (cheaply, all Arcs) into tool futures and sub-agents.
#[derive(Clone)]
pub struct RunContext {
    pub app: AppState,
    pub chat: Arc<ChatState>,
    pub chat_id: String,
    pub mode: ChatMode,
    pub persona: Persona,
    pub platform: Arc<dyn PlatformApi>,
    pub sink: EventSink,
    pub cancel: CancellationToken,
    pub tracker: Arc<ChangeTracker>,
    pub tokens: Arc<Mutex<TokenBreakdown>>,
    /// Set inside a sub-agent so nested dispatch cannot recurse into
    /// another sub-agent.
    pub in_sub_agent: bool,
    /// Tool-surface override. Sub-agents run with a restricted subset
    /// instead of the chat's loaded catalog.
    pub surface: Option<Arc<Vec<dp_domain::tool::ToolDescriptor>>>,
}

/// Truncate for previews and log fields.
pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    }
}
