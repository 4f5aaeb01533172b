//! Sub-agents — nested bounded agent loops invoked as tools.
//!
//! Each sub-agent runs against its own system prompt and a restricted tool
//! subset, with a child cancel token and memory isolated from the parent.
//! Its token usage accumulates under its tool name in the run's breakdown,
//! and its progress/text stream out as `sub_agent_progress` /
//! `sub_agent_text` events tagged with the parent tool.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Value};

use dp_domain::message::ContentBlock;
use dp_domain::step::AgentEvent;
use dp_domain::stream::StreamEvent;
use dp_domain::tool::{ToolCall, ToolDescriptor};
use dp_providers::ChatRequest;

use super::memory::{Memory, ToolResultEntry};
use super::{builtins, tools, RunContext};

pub struct SubAgentSpec {
    pub tool: &'static str,
    pub max_iterations: u32,
    pub system: &'static str,
    pub allowed: &'static [&'static str],
}

const SPECS: &[SubAgentSpec] = &[
    SubAgentSpec {
        tool: "knowledge_base_search",
        max_iterations: 3,
        system: "You are a research assistant for a document-processing platform. Search the \
                 knowledge base (several refined queries if needed), then answer the question \
                 in a few sentences, citing document names in [brackets]. If nothing relevant \
                 exists, say so plainly.",
        allowed: &["knowledge_base_search"],
    },
    SubAgentSpec {
        tool: "patch_schema",
        max_iterations: 5,
        system: "You apply one schema change safely. Read the schema first, apply the \
                 requested patch, then read it back and verify the change landed and nothing \
                 else moved. Report exactly what changed; if verification fails, say what \
                 differs instead of retrying blindly.",
        allowed: &["get_schema", "list_schemas", "patch_schema", "knowledge_base_search"],
    },
    SubAgentSpec {
        tool: "create_schema",
        max_iterations: 4,
        system: "You create a schema. Inspect existing schemas for the account's conventions \
                 first, create the schema, then read it back to confirm the field layout. \
                 Report the new schema id.",
        allowed: &["list_schemas", "get_schema", "create_schema"],
    },
    SubAgentSpec {
        tool: "suggest_lookup_field",
        max_iterations: 4,
        system: "You design a lookup-field configuration. Read the target schema, check the \
                 knowledge base for lookup-field settings, and propose a concrete field \
                 definition (id, label, type, lookup source) without applying it.",
        allowed: &["get_schema", "list_schemas", "knowledge_base_search"],
    },
];

pub fn spec_for(tool_name: &str) -> Option<&'static SubAgentSpec> {
    SPECS.iter().find(|s| s.tool == tool_name)
}

/// Any descriptor by name, regardless of what the chat has loaded.
fn descriptor_by_name(name: &str) -> Option<ToolDescriptor> {
    builtins::builtin_descriptors()
        .into_iter()
        .find(|d| d.name == name)
        .or_else(|| {
            dp_domain::tool::ToolCategory::ALL
                .into_iter()
                .flat_map(|c| {
                    tools::category_descriptors(&[c], dp_domain::chat::ChatMode::ReadWrite)
                })
                .find(|d| d.name == name)
        })
}

/// Run a sub-agent tool call to completion. Returns `(result, is_error)`.
pub async fn run(ctx: &RunContext, call: &ToolCall) -> (Value, bool) {
    let spec = spec_for(&call.tool_name).expect("caller checked spec_for");

    let surface: Vec<ToolDescriptor> = spec
        .allowed
        .iter()
        .filter_map(|name| descriptor_by_name(name))
        .collect();

    let child = RunContext {
        cancel: ctx.cancel.child_token(),
        in_sub_agent: true,
        surface: Some(Arc::new(surface.clone())),
        ..ctx.clone()
    };

    let task = format!(
        "Task from the main agent (tool `{}`):\n{}",
        spec.tool,
        serde_json::to_string_pretty(&call.arguments).unwrap_or_default()
    );
    let mut memory = Memory::default();
    memory.begin_turn(vec![ContentBlock::text(task)]);

    let mut last_text = String::new();

    // Spec cap, bounded further by config when the operator lowered it.
    let max_iterations = spec
        .max_iterations
        .min(ctx.app.config.runtime.sub_agent_max_iterations.max(1));

    for iteration in 1..=max_iterations {
        if child.cancel.is_cancelled() {
            return (Value::Null, true);
        }

        child
            .sink
            .send(AgentEvent::SubAgentProgress {
                tool_name: spec.tool.to_string(),
                iteration,
                max_iterations,
                note: None,
            })
            .await;

        let req = ChatRequest {
            model: child.app.config.llm.model.clone(),
            system: spec.system.to_string(),
            messages: memory.fold(),
            tools: surface.clone(),
            max_tokens: child.app.config.llm.max_output_tokens,
            thinking_budget: None,
            cache: true,
        };

        let mut stream = match child.app.llm.chat_stream(&req).await {
            Ok(s) => s,
            Err(e) => return (json!({ "error": e.to_string() }), true),
        };

        let mut text = String::new();
        let mut pending: Vec<ToolCall> = Vec::new();

        loop {
            let event = tokio::select! {
                _ = child.cancel.cancelled() => return (Value::Null, true),
                next = stream.next() => match next {
                    Some(ev) => ev,
                    None => break,
                },
            };

            match event {
                Ok(StreamEvent::TextDelta { text: delta }) => {
                    child
                        .sink
                        .send(AgentEvent::SubAgentText {
                            tool_name: spec.tool.to_string(),
                            text: delta.clone(),
                        })
                        .await;
                    text.push_str(&delta);
                }
                Ok(StreamEvent::ToolUseFinished { id, name, input }) => {
                    pending.push(ToolCall {
                        call_id: id,
                        tool_name: name,
                        arguments: input,
                    });
                }
                Ok(StreamEvent::Done { usage, .. }) => {
                    if let Some(usage) = usage {
                        child.tokens.lock().record_sub_agent(spec.tool, &usage);
                    }
                }
                Ok(StreamEvent::Error { message }) => {
                    return (json!({ "error": message }), true);
                }
                // Sub-agents run without extended thinking.
                Ok(_) => {}
                Err(e) => return (json!({ "error": e.to_string() }), true),
            }
        }

        if !text.is_empty() {
            last_text = text.clone();
        }

        if pending.is_empty() {
            return (Value::String(text), false);
        }

        let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
        if !text.is_empty() {
            assistant_blocks.push(ContentBlock::text(text));
        }
        for tc in &pending {
            assistant_blocks.push(ContentBlock::ToolUse {
                id: tc.call_id.clone(),
                name: tc.tool_name.clone(),
                input: tc.arguments.clone(),
            });
        }
        memory.push_assistant(assistant_blocks);

        // Sequential dispatch: a sub-agent's tool calls are few and often
        // dependent (read, write, verify).
        let mut entries = Vec::with_capacity(pending.len());
        for tc in &pending {
            let (result, is_error) = tools::dispatch_tool(&child, tc).await;
            entries.push(ToolResultEntry {
                call_id: tc.call_id.clone(),
                tool_name: tc.tool_name.clone(),
                collapsible: tools::collapsible(&tc.tool_name),
                content: result,
                is_error,
            });
        }
        memory.push_tool_results(entries);
    }

    tracing::debug!(tool = spec.tool, "sub-agent hit its iteration cap");
    (
        Value::String(format!(
            "{last_text}\n[stopped at the sub-agent iteration cap]"
        )),
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specs_cover_the_sub_agent_tools() {
        for name in [
            "knowledge_base_search",
            "patch_schema",
            "create_schema",
            "suggest_lookup_field",
        ] {
            assert!(spec_for(name).is_some(), "missing spec for {name}");
        }
        assert!(spec_for("get_queue").is_none());
    }

    #[test]
    fn iteration_caps_are_bounded() {
        for spec in SPECS {
            assert!((3..=5).contains(&spec.max_iterations), "{}", spec.tool);
        }
    }

    #[test]
    fn allowed_tools_resolve_to_descriptors() {
        for spec in SPECS {
            for name in spec.allowed {
                assert!(
                    descriptor_by_name(name).is_some(),
                    "{} allows unknown tool {name}",
                    spec.tool
                );
            }
        }
    }
}
