//! The event taxonomy streamed to clients over SSE.
//!
//! Streaming lifecycle contract: for `thinking`, `intermediate`, and
//! `final_answer` steps, several events may share one `(step_number, type)`
//! tuple with `is_streaming=true`; each replaces the previous. The server
//! may advance to the next tuple without emitting a finalized
//! (`is_streaming=false`) event — consumers commit the last streaming event
//! seen when the tuple changes. `tool_result` is emitted exactly once with
//! `is_streaming=false`; `error` is terminal with `is_final=true`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::commit::CommitSummary;
use crate::stream::Usage;
use crate::task::TaskItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Thinking,
    Intermediate,
    ToolStart,
    ToolResult,
    FinalAnswer,
    Error,
}

/// Progress through a multi-part tool invocation (current, total).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProgress {
    pub current: u32,
    pub total: u32,
}

/// One agent step, streamed as the `step` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub step_number: u64,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_arguments: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_progress: Option<ToolProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_final: bool,
    /// Pair `tool_start` with its `tool_result` by this id when present;
    /// fall back to `step_number` for legacy events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl StepEvent {
    fn bare(step_number: u64, step_type: StepType) -> Self {
        Self {
            step_number,
            step_type,
            content: None,
            tool_name: None,
            tool_arguments: None,
            tool_progress: None,
            result: None,
            is_error: false,
            is_streaming: false,
            is_final: false,
            tool_call_id: None,
        }
    }

    /// A streaming text-bearing step (thinking / intermediate / final_answer).
    pub fn streaming(step_number: u64, step_type: StepType, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            is_streaming: true,
            ..Self::bare(step_number, step_type)
        }
    }

    /// A finalized text-bearing step.
    pub fn finalized(step_number: u64, step_type: StepType, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::bare(step_number, step_type)
        }
    }

    pub fn final_answer(step_number: u64, content: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::finalized(step_number, StepType::FinalAnswer, content)
        }
    }

    pub fn tool_start(
        step_number: u64,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            tool_arguments: Some(arguments),
            tool_call_id: Some(call_id.into()),
            ..Self::bare(step_number, StepType::ToolStart)
        }
    }

    pub fn tool_result(
        step_number: u64,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: serde_json::Value,
        is_error: bool,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            result: Some(result),
            is_error,
            tool_call_id: Some(call_id.into()),
            ..Self::bare(step_number, StepType::ToolResult)
        }
    }

    pub fn error(step_number: u64, message: impl Into<String>) -> Self {
        Self {
            content: Some(message.into()),
            is_error: true,
            is_final: true,
            ..Self::bare(step_number, StepType::Error)
        }
    }
}

/// Token usage split between the main agent and each sub-agent tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub main: Usage,
    /// Keyed by sub-agent tool name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_agents: BTreeMap<String, Usage>,
}

impl TokenBreakdown {
    pub fn record_main(&mut self, usage: &Usage) {
        self.main.add(usage);
    }

    pub fn record_sub_agent(&mut self, tool_name: &str, usage: &Usage) {
        self.sub_agents
            .entry(tool_name.to_string())
            .or_default()
            .add(usage);
    }

    pub fn total(&self) -> Usage {
        let mut total = self.main.clone();
        for usage in self.sub_agents.values() {
            total.add(usage);
        }
        total
    }
}

/// Everything the gateway can put on the wire for one run. The enum variant
/// selects the SSE `event:` name; the payload is the `data:` JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AgentEvent {
    Step(StepEvent),
    SubAgentProgress {
        tool_name: String,
        iteration: u32,
        max_iterations: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    SubAgentText {
        tool_name: String,
        text: String,
    },
    TaskSnapshot {
        tasks: Vec<TaskItem>,
    },
    FileCreated {
        name: String,
        size_bytes: u64,
    },
    Done {
        usage: TokenBreakdown,
        #[serde(skip_serializing_if = "Option::is_none")]
        commit: Option<CommitSummary>,
        cancelled: bool,
    },
}

impl AgentEvent {
    /// SSE `event:` name for this payload.
    pub fn sse_name(&self) -> &'static str {
        match self {
            AgentEvent::Step(_) => "step",
            AgentEvent::SubAgentProgress { .. } => "sub_agent_progress",
            AgentEvent::SubAgentText { .. } => "sub_agent_text",
            AgentEvent::TaskSnapshot { .. } => "task_snapshot",
            AgentEvent::FileCreated { .. } => "file_created",
            AgentEvent::Done { .. } => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, AgentEvent::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_event_roundtrip_is_lossless() {
        let ev = StepEvent {
            tool_progress: Some(ToolProgress {
                current: 2,
                total: 5,
            }),
            ..StepEvent::tool_result(4, "tc_9", "get_queue", json!({"id": 1}), false)
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: StepEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step_number, 4);
        assert_eq!(back.step_type, StepType::ToolResult);
        assert_eq!(back.tool_call_id.as_deref(), Some("tc_9"));
        assert_eq!(back.tool_progress, ev.tool_progress);
        assert_eq!(back.result, ev.result);
    }

    #[test]
    fn step_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&StepType::FinalAnswer).unwrap(),
            "\"final_answer\""
        );
        assert_eq!(
            serde_json::to_string(&StepType::ToolStart).unwrap(),
            "\"tool_start\""
        );
    }

    #[test]
    fn error_step_is_final() {
        let ev = StepEvent::error(9, "boom");
        assert!(ev.is_final);
        assert!(ev.is_error);
        assert!(!ev.is_streaming);
    }

    #[test]
    fn breakdown_totals_roll_up_sub_agents() {
        let mut breakdown = TokenBreakdown::default();
        breakdown.record_main(&Usage {
            input_tokens: 100,
            output_tokens: 50,
            ..Default::default()
        });
        breakdown.record_sub_agent(
            "patch_schema",
            &Usage {
                input_tokens: 10,
                output_tokens: 20,
                ..Default::default()
            },
        );
        breakdown.record_sub_agent(
            "patch_schema",
            &Usage {
                input_tokens: 5,
                output_tokens: 5,
                ..Default::default()
            },
        );
        let total = breakdown.total();
        assert_eq!(total.input_tokens, 115);
        assert_eq!(total.output_tokens, 75);
        assert_eq!(breakdown.sub_agents["patch_schema"].input_tokens, 15);
    }

    #[test]
    fn sse_names_cover_taxonomy() {
        let done = AgentEvent::Done {
            usage: TokenBreakdown::default(),
            commit: None,
            cancelled: false,
        };
        assert_eq!(done.sse_name(), "done");
        assert!(done.is_done());
        assert_eq!(AgentEvent::Step(StepEvent::error(1, "x")).sse_name(), "step");
    }
}
