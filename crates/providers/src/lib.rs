//! LLM provider abstraction and the Anthropic Messages adapter.

pub mod anthropic;
pub mod sse;

use async_trait::async_trait;

use dp_domain::message::ContentBlock;
use dp_domain::stream::{BoxStream, StreamEvent, Usage};
use dp_domain::tool::ToolDescriptor;
use dp_domain::Result;

pub use anthropic::AnthropicProvider;

/// Role of a prompt message. Tool results ride in user messages (the
/// Anthropic convention), so there is no tool role at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    User,
    Assistant,
}

/// One message of the folded prompt.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub blocks: Vec<ContentBlock>,
}

impl PromptMessage {
    pub fn user(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: PromptRole::User,
            blocks,
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: PromptRole::Assistant,
            blocks,
        }
    }
}

/// A chat-completion request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<PromptMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub max_tokens: u32,
    /// Extended-thinking budget; `None` disables thinking.
    pub thinking_budget: Option<u32>,
    /// Mark the system prompt, tool schema, and history prefix cacheable.
    pub cache: bool,
}

/// A non-streaming completion (used for commit-message generation).
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a completion; the returned stream yields deltas and ends with
    /// a `Done` event carrying usage.
    async fn chat_stream(&self, req: &ChatRequest)
        -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// One-shot completion without streaming or tools.
    async fn complete(&self, req: &ChatRequest) -> Result<Completion>;
}
