//! Anthropic Messages API adapter.
//!
//! Speaks the native Messages shape: system prompt in a top-level `system`
//! field, tool results as user messages with `tool_result` blocks, extended
//! thinking blocks, and prompt caching via `cache_control` markers on the
//! system prompt, the last tool definition, and the tail of the history.

use serde_json::{json, Value};
use std::collections::HashMap;

use dp_domain::message::ContentBlock;
use dp_domain::stream::{BoxStream, StreamEvent, Usage};
use dp_domain::tool::ToolDescriptor;
use dp_domain::{Error, Result};

use crate::sse::{frame_stream, SseFrame};
use crate::{ChatRequest, Completion, LlmProvider, PromptMessage, PromptRole};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Build from config; the API key is read from the environment variable
    /// the config names.
    pub fn from_config(cfg: &dp_domain::config::LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Config(format!("{} is not set", cfg.api_key_env)))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": req.model,
            "max_tokens": req.max_tokens,
            "stream": stream,
            "messages": messages_to_wire(&req.messages, req.cache),
        });

        if !req.system.is_empty() {
            let mut sys_block = json!({ "type": "text", "text": req.system });
            if req.cache {
                sys_block["cache_control"] = json!({ "type": "ephemeral" });
            }
            body["system"] = json!([sys_block]);
        }

        if !req.tools.is_empty() {
            let mut tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            if req.cache {
                if let Some(last) = tools.last_mut() {
                    last["cache_control"] = json!({ "type": "ephemeral" });
                }
            }
            body["tools"] = Value::Array(tools);
        }

        if let Some(budget) = req.thinking_budget.filter(|b| *b > 0) {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn messages_to_wire(messages: &[PromptMessage], cache: bool) -> Vec<Value> {
    let last_idx = messages.len().saturating_sub(1);
    messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let role = match msg.role {
                PromptRole::User => "user",
                PromptRole::Assistant => "assistant",
            };
            let mut blocks: Vec<Value> = msg.blocks.iter().map(block_to_wire).collect();
            // Cache breakpoint on the tail of the history so the prefix
            // (system + tools + earlier turns) is reusable next iteration.
            if cache && i == last_idx {
                if let Some(last) = blocks.last_mut() {
                    last["cache_control"] = json!({ "type": "ephemeral" });
                }
            }
            json!({ "role": role, "content": blocks })
        })
        .collect()
}

fn block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Thinking { text, signature } => {
            let mut v = json!({ "type": "thinking", "thinking": text });
            if let Some(sig) = signature {
                v["signature"] = json!(sig);
            }
            v
        }
        ContentBlock::ToolUse { id, name, input } => {
            json!({ "type": "tool_use", "id": id, "name": name, "input": input })
        }
        ContentBlock::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => {
            // The API wants string content; non-string results are rendered
            // as their JSON text.
            let content_str = match content {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content_str,
                "is_error": is_error,
            })
        }
        ContentBlock::Image { media_type, data } => json!({
            "type": "image",
            "source": { "type": "base64", "media_type": media_type, "data": data }
        }),
    }
}

fn tool_to_wire(tool: &ToolDescriptor) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Usage {
    let field = |name: &str| v.get(name).and_then(Value::as_u64).unwrap_or(0) as u32;
    Usage {
        input_tokens: field("input_tokens"),
        output_tokens: field("output_tokens"),
        cache_creation_tokens: field("cache_creation_input_tokens"),
        cache_read_tokens: field("cache_read_input_tokens"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse { id: String, name: String },
}

/// Per-response assembly state: block kinds by index, tool-argument
/// buffers, usage accumulated from message_start/message_delta.
struct StreamState {
    blocks: HashMap<u64, BlockKind>,
    tool_args: HashMap<u64, String>,
    usage: Usage,
    done_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            tool_args: HashMap::new(),
            usage: Usage::default(),
            done_emitted: false,
        }
    }
}

fn parse_frame(frame: SseFrame, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();
    if frame.data.is_empty() {
        return events;
    }

    let v: Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Provider(format!("bad stream frame: {e}"))));
            return events;
        }
    };

    let frame_type = v.get("type").and_then(Value::as_str).unwrap_or_default();

    match frame_type {
        "message_start" => {
            if let Some(usage) = v.pointer("/message/usage") {
                state.usage = parse_usage(usage);
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            let kind = v.pointer("/content_block/type").and_then(Value::as_str);
            match kind {
                Some("thinking") | Some("redacted_thinking") => {
                    state.blocks.insert(idx, BlockKind::Thinking);
                }
                Some("tool_use") => {
                    let id = v
                        .pointer("/content_block/id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = v
                        .pointer("/content_block/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    events.push(Ok(StreamEvent::ToolUseStarted {
                        id: id.clone(),
                        name: name.clone(),
                    }));
                    state.blocks.insert(idx, BlockKind::ToolUse { id, name });
                    state.tool_args.insert(idx, String::new());
                }
                _ => {
                    state.blocks.insert(idx, BlockKind::Text);
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            let delta_type = v.pointer("/delta/type").and_then(Value::as_str);
            match delta_type {
                Some("text_delta") => {
                    if let Some(text) = v.pointer("/delta/text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            events.push(Ok(StreamEvent::TextDelta {
                                text: text.to_string(),
                            }));
                        }
                    }
                }
                Some("thinking_delta") => {
                    if let Some(text) = v.pointer("/delta/thinking").and_then(Value::as_str) {
                        if !text.is_empty() {
                            events.push(Ok(StreamEvent::ThinkingDelta {
                                text: text.to_string(),
                            }));
                        }
                    }
                }
                Some("signature_delta") => {
                    if let Some(sig) = v.pointer("/delta/signature").and_then(Value::as_str) {
                        events.push(Ok(StreamEvent::ThinkingSignature {
                            signature: sig.to_string(),
                        }));
                    }
                }
                Some("input_json_delta") => {
                    if let Some(partial) =
                        v.pointer("/delta/partial_json").and_then(Value::as_str)
                    {
                        if let Some(buf) = state.tool_args.get_mut(&idx) {
                            buf.push_str(partial);
                        }
                        if let Some(BlockKind::ToolUse { id, .. }) = state.blocks.get(&idx) {
                            events.push(Ok(StreamEvent::ToolUseDelta {
                                id: id.clone(),
                                partial_json: partial.to_string(),
                            }));
                        }
                    }
                }
                _ => {}
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some(BlockKind::ToolUse { id, name }) = state.blocks.remove(&idx) {
                let args = state.tool_args.remove(&idx).unwrap_or_default();
                let input = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&args).unwrap_or_else(|e| {
                        tracing::warn!(tool = %name, error = %e, "unparseable tool arguments");
                        Value::Object(Default::default())
                    })
                };
                events.push(Ok(StreamEvent::ToolUseFinished { id, name, input }));
            }
        }

        "message_delta" => {
            if let Some(output) = v
                .pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
            {
                state.usage.output_tokens = output as u32;
            }
            if let Some(stop) = v.pointer("/delta/stop_reason").and_then(Value::as_str) {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    usage: Some(state.usage.clone()),
                    stop_reason: Some(stop.to_string()),
                }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    usage: Some(state.usage.clone()),
                    stop_reason: None,
                }));
            }
        }

        "error" => {
            let msg = v
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            events.push(Ok(StreamEvent::Error {
                message: msg.to_string(),
            }));
        }

        // ping and future frame types.
        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req, true);

        tracing::debug!(model = %req.model, tools = req.tools.len(), "anthropic stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("HTTP {status}: {text}")));
        }

        let mut state = StreamState::new();
        Ok(frame_stream(resp, move |frame| {
            parse_frame(frame, &mut state)
        }))
    }

    async fn complete(&self, req: &ChatRequest) -> Result<Completion> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req, false);

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Provider(format!("HTTP {status}: {text}")));
        }

        let v: Value = serde_json::from_str(&text)?;
        let content = v
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        (b.get("type").and_then(Value::as_str) == Some("text"))
                            .then(|| b.get("text").and_then(Value::as_str))
                            .flatten()
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let usage = v.get("usage").map(parse_usage).unwrap_or_default();

        Ok(Completion {
            text: content,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(data: &str) -> SseFrame {
        SseFrame {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn thinking_and_text_deltas_are_separated() {
        let mut state = StreamState::new();
        parse_frame(
            frame(r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking"}}"#),
            &mut state,
        );
        let ev = parse_frame(
            frame(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"let me see"}}"#,
            ),
            &mut state,
        );
        assert!(matches!(
            ev[0].as_ref().unwrap(),
            StreamEvent::ThinkingDelta { text } if text == "let me see"
        ));

        let ev = parse_frame(
            frame(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"answer"}}"#,
            ),
            &mut state,
        );
        assert!(matches!(
            ev[0].as_ref().unwrap(),
            StreamEvent::TextDelta { text } if text == "answer"
        ));
    }

    #[test]
    fn tool_use_assembles_across_deltas() {
        let mut state = StreamState::new();
        let started = parse_frame(
            frame(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"tc_1","name":"get_queue"}}"#,
            ),
            &mut state,
        );
        assert!(matches!(
            started[0].as_ref().unwrap(),
            StreamEvent::ToolUseStarted { id, name } if id == "tc_1" && name == "get_queue"
        ));

        parse_frame(
            frame(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"id\":"}}"#,
            ),
            &mut state,
        );
        parse_frame(
            frame(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"7}"}}"#,
            ),
            &mut state,
        );
        let finished = parse_frame(
            frame(r#"{"type":"content_block_stop","index":0}"#),
            &mut state,
        );
        match finished[0].as_ref().unwrap() {
            StreamEvent::ToolUseFinished { id, name, input } => {
                assert_eq!(id, "tc_1");
                assert_eq!(name, "get_queue");
                assert_eq!(input, &json!({"id": 7}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn usage_carries_cache_counters() {
        let mut state = StreamState::new();
        parse_frame(
            frame(
                r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"cache_creation_input_tokens":800,"cache_read_input_tokens":40}}}"#,
            ),
            &mut state,
        );
        let done = parse_frame(
            frame(
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":99}}"#,
            ),
            &mut state,
        );
        match done[0].as_ref().unwrap() {
            StreamEvent::Done { usage, stop_reason } => {
                let u = usage.as_ref().unwrap();
                assert_eq!(u.input_tokens, 12);
                assert_eq!(u.output_tokens, 99);
                assert_eq!(u.cache_creation_tokens, 800);
                assert_eq!(u.cache_read_tokens, 40);
                assert_eq!(stop_reason.as_deref(), Some("end_turn"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn message_stop_emits_done_once() {
        let mut state = StreamState::new();
        parse_frame(
            frame(r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":1}}"#),
            &mut state,
        );
        let again = parse_frame(frame(r#"{"type":"message_stop"}"#), &mut state);
        assert!(again.is_empty());
    }

    #[test]
    fn body_marks_cache_breakpoints() {
        let provider = AnthropicProvider {
            base_url: "http://localhost".into(),
            api_key: "k".into(),
            client: reqwest::Client::new(),
        };
        let req = ChatRequest {
            model: "claude-sonnet-4-20250514".into(),
            system: "be helpful".into(),
            messages: vec![PromptMessage::user(vec![ContentBlock::text("hi")])],
            tools: vec![ToolDescriptor {
                name: "get_queue".into(),
                description: "d".into(),
                parameters: json!({"type":"object"}),
                category: None,
                read_only: true,
                collapsible: false,
            }],
            max_tokens: 1024,
            thinking_budget: Some(512),
            cache: true,
        };
        let body = provider.build_body(&req, true);
        assert!(body["system"][0]["cache_control"].is_object());
        assert!(body["tools"][0]["cache_control"].is_object());
        assert!(body["messages"][0]["content"][0]["cache_control"].is_object());
        assert_eq!(body["thinking"]["budget_tokens"], 512);
    }

    #[test]
    fn tool_result_block_renders_string_content() {
        let wire = block_to_wire(&ContentBlock::ToolResult {
            tool_call_id: "tc_1".into(),
            content: json!({"count": 3}),
            is_error: false,
        });
        assert_eq!(wire["tool_use_id"], "tc_1");
        assert_eq!(wire["content"], "{\"count\":3}");
    }
}
