//! Folded conversation memory.
//!
//! The transcript is the durable record; `Memory` is the working copy the
//! loop sends to the model. The fold is deterministic and sequential:
//!
//! - thinking blocks stay within the turn that produced them and are not
//!   replayed in later turns;
//! - repeated results from a collapsible tool are summarized — only the
//!   most recent survives in full, earlier ones become a one-line
//!   descriptor (the `tool_result` block itself stays so pairing holds);
//! - images are retained for the whole conversation;
//! - the last assistant text stands as the final-answer anchor when no
//!   tool was called.

use serde_json::Value;

use dp_domain::message::{ChatMessage, ContentBlock, Role};
use dp_providers::PromptMessage;

/// One tool result held in memory, tagged with what produced it.
#[derive(Debug, Clone)]
pub struct ToolResultEntry {
    pub call_id: String,
    pub tool_name: String,
    pub collapsible: bool,
    pub content: Value,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
enum MemoryItem {
    User { blocks: Vec<ContentBlock>, turn: u32 },
    Assistant { blocks: Vec<ContentBlock>, turn: u32 },
    ToolResults { entries: Vec<ToolResultEntry>, turn: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct Memory {
    items: Vec<MemoryItem>,
    turn: u32,
}

impl Memory {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Start a new user turn.
    pub fn begin_turn(&mut self, blocks: Vec<ContentBlock>) {
        self.turn += 1;
        let turn = self.turn;
        self.items.push(MemoryItem::User { blocks, turn });
    }

    pub fn push_assistant(&mut self, blocks: Vec<ContentBlock>) {
        let turn = self.turn;
        self.items.push(MemoryItem::Assistant { blocks, turn });
    }

    pub fn push_tool_results(&mut self, entries: Vec<ToolResultEntry>) {
        let turn = self.turn;
        self.items.push(MemoryItem::ToolResults { entries, turn });
    }

    /// Produce the prompt for the next model call.
    pub fn fold(&self) -> Vec<PromptMessage> {
        // Last index of each collapsible tool's result across the whole
        // memory; everything earlier collapses to a descriptor.
        let mut latest: std::collections::HashMap<&str, (usize, usize)> =
            std::collections::HashMap::new();
        for (i, item) in self.items.iter().enumerate() {
            if let MemoryItem::ToolResults { entries, .. } = item {
                for (j, entry) in entries.iter().enumerate() {
                    if entry.collapsible {
                        latest.insert(entry.tool_name.as_str(), (i, j));
                    }
                }
            }
        }

        let mut prompt = Vec::with_capacity(self.items.len());
        for (i, item) in self.items.iter().enumerate() {
            match item {
                MemoryItem::User { blocks, .. } => {
                    prompt.push(PromptMessage::user(blocks.clone()));
                }
                MemoryItem::Assistant { blocks, turn } => {
                    let keep_thinking = *turn == self.turn;
                    let blocks: Vec<ContentBlock> = blocks
                        .iter()
                        .filter(|b| keep_thinking || !matches!(b, ContentBlock::Thinking { .. }))
                        .cloned()
                        .collect();
                    prompt.push(PromptMessage::assistant(blocks));
                }
                MemoryItem::ToolResults { entries, .. } => {
                    let blocks: Vec<ContentBlock> = entries
                        .iter()
                        .enumerate()
                        .map(|(j, entry)| {
                            let collapsed = entry.collapsible
                                && latest.get(entry.tool_name.as_str()) != Some(&(i, j));
                            let content = if collapsed {
                                Value::String(format!(
                                    "[{} result collapsed; superseded by a newer call]",
                                    entry.tool_name
                                ))
                            } else {
                                entry.content.clone()
                            };
                            ContentBlock::ToolResult {
                                tool_call_id: entry.call_id.clone(),
                                content,
                                is_error: entry.is_error,
                            }
                        })
                        .collect();
                    prompt.push(PromptMessage::user(blocks));
                }
            }
        }
        prompt
    }

    /// Rebuild memory from a persisted transcript (process restart). Tool
    /// names for result entries are recovered from the matching `tool_use`
    /// blocks; `collapsible` answers whether a tool's results collapse.
    pub fn from_transcript(
        messages: &[ChatMessage],
        collapsible: &dyn Fn(&str) -> bool,
    ) -> Memory {
        let mut memory = Memory::default();
        let mut call_names: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();

        for msg in messages {
            match msg.role {
                Role::User => memory.begin_turn(msg.blocks.clone()),
                Role::Assistant => {
                    for (id, name, _) in msg.tool_uses() {
                        call_names.insert(id.to_string(), name.to_string());
                    }
                    memory.push_assistant(msg.blocks.clone());
                }
                Role::Tool => {
                    let entries: Vec<ToolResultEntry> = msg
                        .blocks
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::ToolResult {
                                tool_call_id,
                                content,
                                is_error,
                            } => {
                                let tool_name = call_names
                                    .get(tool_call_id)
                                    .cloned()
                                    .unwrap_or_default();
                                Some(ToolResultEntry {
                                    call_id: tool_call_id.clone(),
                                    collapsible: collapsible(&tool_name),
                                    tool_name,
                                    content: content.clone(),
                                    is_error: *is_error,
                                })
                            }
                            _ => None,
                        })
                        .collect();
                    if !entries.is_empty() {
                        memory.push_tool_results(entries);
                    }
                }
            }
        }
        memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(call_id: &str, tool: &str, collapsible: bool, content: Value) -> ToolResultEntry {
        ToolResultEntry {
            call_id: call_id.into(),
            tool_name: tool.into(),
            collapsible,
            content,
            is_error: false,
        }
    }

    fn result_contents(prompt: &[PromptMessage]) -> Vec<(String, Value)> {
        prompt
            .iter()
            .flat_map(|m| m.blocks.iter())
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_call_id,
                    content,
                    ..
                } => Some((tool_call_id.clone(), content.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn collapsible_results_keep_only_latest_in_full() {
        let mut memory = Memory::default();
        memory.begin_turn(vec![ContentBlock::text("list queues twice")]);
        memory.push_assistant(vec![ContentBlock::ToolUse {
            id: "a".into(),
            name: "list_queues".into(),
            input: json!({}),
        }]);
        memory.push_tool_results(vec![result("a", "list_queues", true, json!(["q1"]))]);
        memory.push_assistant(vec![ContentBlock::ToolUse {
            id: "b".into(),
            name: "list_queues".into(),
            input: json!({}),
        }]);
        memory.push_tool_results(vec![result("b", "list_queues", true, json!(["q1", "q2"]))]);

        let contents = result_contents(&memory.fold());
        assert_eq!(contents.len(), 2);
        // Earlier result is a one-line descriptor; the latest is full.
        assert!(contents[0].1.as_str().unwrap().contains("collapsed"));
        assert_eq!(contents[1].1, json!(["q1", "q2"]));
    }

    #[test]
    fn non_collapsible_results_always_survive() {
        let mut memory = Memory::default();
        memory.begin_turn(vec![ContentBlock::text("get queues")]);
        memory.push_tool_results(vec![
            result("a", "get_queue", false, json!({"id": 1})),
            result("b", "get_queue", false, json!({"id": 2})),
        ]);
        let contents = result_contents(&memory.fold());
        assert_eq!(contents[0].1, json!({"id": 1}));
        assert_eq!(contents[1].1, json!({"id": 2}));
    }

    #[test]
    fn thinking_dropped_from_previous_turns_only() {
        let mut memory = Memory::default();
        memory.begin_turn(vec![ContentBlock::text("first")]);
        memory.push_assistant(vec![
            ContentBlock::Thinking {
                text: "old thoughts".into(),
                signature: None,
            },
            ContentBlock::text("first answer"),
        ]);
        memory.begin_turn(vec![ContentBlock::text("second")]);
        memory.push_assistant(vec![
            ContentBlock::Thinking {
                text: "current thoughts".into(),
                signature: None,
            },
            ContentBlock::text("working on it"),
        ]);

        let prompt = memory.fold();
        let thinking: Vec<&str> = prompt
            .iter()
            .flat_map(|m| m.blocks.iter())
            .filter_map(|b| match b {
                ContentBlock::Thinking { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(thinking, ["current thoughts"]);
    }

    #[test]
    fn images_are_retained_across_turns() {
        let mut memory = Memory::default();
        memory.begin_turn(vec![
            ContentBlock::text("look at this"),
            ContentBlock::Image {
                media_type: "image/png".into(),
                data: "AAAA".into(),
            },
        ]);
        memory.push_assistant(vec![ContentBlock::text("seen")]);
        memory.begin_turn(vec![ContentBlock::text("next")]);

        let prompt = memory.fold();
        let images = prompt
            .iter()
            .flat_map(|m| m.blocks.iter())
            .filter(|b| matches!(b, ContentBlock::Image { .. }))
            .count();
        assert_eq!(images, 1);
    }

    #[test]
    fn rebuild_from_transcript_recovers_tool_names() {
        let transcript = vec![
            ChatMessage::user("list queues"),
            ChatMessage::new(
                Role::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "a".into(),
                    name: "list_queues".into(),
                    input: json!({}),
                }],
            ),
            ChatMessage::tool_result("a", json!(["q1"]), false),
            ChatMessage::new(
                Role::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "b".into(),
                    name: "list_queues".into(),
                    input: json!({}),
                }],
            ),
            ChatMessage::tool_result("b", json!(["q1", "q2"]), false),
        ];
        let memory = Memory::from_transcript(&transcript, &|name| name.starts_with("list_"));
        let contents = result_contents(&memory.fold());
        assert!(contents[0].1.as_str().unwrap().contains("collapsed"));
        assert_eq!(contents[1].1, json!(["q1", "q2"]));
    }

    #[test]
    fn fold_is_deterministic() {
        let mut memory = Memory::default();
        memory.begin_turn(vec![ContentBlock::text("hi")]);
        memory.push_assistant(vec![ContentBlock::text("hello")]);
        let a = format!("{:?}", memory.fold().len());
        let b = format!("{:?}", memory.fold().len());
        assert_eq!(a, b);
    }
}
