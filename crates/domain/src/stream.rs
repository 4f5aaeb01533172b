//! Provider-agnostic LLM streaming events and token accounting.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while an LLM response streams in.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Chain-of-thought delta.
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { text: String },

    /// Signature attached to a completed thinking block; must be replayed
    /// with the block when the turn continues after tool use.
    #[serde(rename = "thinking_signature")]
    ThinkingSignature { signature: String },

    /// Visible assistant text delta.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    #[serde(rename = "tool_use_started")]
    ToolUseStarted { id: String, name: String },

    #[serde(rename = "tool_use_delta")]
    ToolUseDelta { id: String, partial_json: String },

    /// Tool-use block complete with assembled arguments.
    #[serde(rename = "tool_use_finished")]
    ToolUseFinished {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        stop_reason: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for one model call, with the prompt-cache breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_tokens
            + self.cache_read_tokens
    }

    /// Fold another call's usage into this accumulator.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_add_accumulates_all_counters() {
        let mut total = Usage::default();
        total.add(&Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_tokens: 100,
            cache_read_tokens: 0,
        });
        total.add(&Usage {
            input_tokens: 2,
            output_tokens: 3,
            cache_creation_tokens: 0,
            cache_read_tokens: 100,
        });
        assert_eq!(total.input_tokens, 12);
        assert_eq!(total.output_tokens, 8);
        assert_eq!(total.cache_creation_tokens, 100);
        assert_eq!(total.cache_read_tokens, 100);
        assert_eq!(total.total(), 220);
    }
}
