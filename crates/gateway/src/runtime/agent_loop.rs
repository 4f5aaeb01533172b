//! The agent loop — drives one user message to a final answer.
//!
//! Each iteration: fold memory into a prompt, stream the model (thinking
//! and visible text as separate step events sharing a step number),
//! dispatch any tool calls in parallel, fold the results back, and repeat
//! until the model answers without tools, the iteration cap trips, the run
//! is cancelled, or an unrecoverable error surfaces. The `done` event
//! always closes the stream.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use dp_domain::chat::{ChatMeta, ChatMode, Persona};
use dp_domain::message::{ChatMessage, ContentBlock, Role};
use dp_domain::step::{AgentEvent, StepEvent, StepType, TokenBreakdown};
use dp_domain::stream::{StreamEvent, Usage};
use dp_domain::tool::ToolCall;
use dp_domain::{Error, Result};
use dp_platform::catalog;
use dp_providers::ChatRequest;

use crate::state::AppState;

use super::events::EventSink;
use super::memory::{Memory, ToolResultEntry};
use super::registry::ChatState;
use super::tracking::{self, ChangeTracker};
use super::{prompt, tools, truncate_str, RunContext};

/// One inbound message, resolved (mode/persona overrides applied).
pub struct MessageInput {
    pub content: String,
    /// Base64 image attachment.
    pub image: Option<(String, String)>,
    /// Reference to a platform document to ground the conversation on.
    pub document_id: Option<String>,
    /// Pinned context (URLs, plan artifacts) to carry in the prompt.
    pub context_notes: Vec<String>,
    pub mode: ChatMode,
    pub persona: Persona,
}

/// Entry point: run the loop and always close with `done`.
///
/// Cancellation is not an error: the stream ends with `done`
/// (`cancelled=true`) and pending changes are discarded without a commit.
pub async fn run_message(
    app: AppState,
    chat: Arc<ChatState>,
    meta: ChatMeta,
    input: MessageInput,
    sink: EventSink,
    cancel: CancellationToken,
) {
    let credentials = chat.credentials.lock().clone();
    let platform = app.platform.connect(&credentials);
    let tracker = Arc::new(ChangeTracker::new(
        chat.clone(),
        input.mode == ChatMode::ReadWrite,
    ));
    let tokens = Arc::new(Mutex::new(TokenBreakdown::default()));

    let ctx = RunContext {
        app,
        chat: chat.clone(),
        chat_id: meta.chat_id.clone(),
        mode: input.mode,
        persona: input.persona,
        platform,
        sink: sink.clone(),
        cancel: cancel.clone(),
        tracker: tracker.clone(),
        tokens: tokens.clone(),
        in_sub_agent: false,
        surface: None,
    };

    let mut memory = match prepare_memory(&ctx).await {
        Ok(memory) => memory,
        Err(e) => {
            sink.step(StepEvent::error(1, e.to_string())).await;
            finish(&sink, &tokens, &tracker, cancel.is_cancelled()).await;
            return;
        }
    };

    let mut step: u64 = 0;
    if let Err(e) = run_loop(&ctx, meta, &input, &mut memory, &mut step).await {
        // Internal errors get an opaque id in the log, a short message on
        // the wire.
        let err_id = uuid::Uuid::new_v4();
        tracing::error!(chat_id = %ctx.chat_id, %err_id, error = %e, "run failed");
        sink.step(StepEvent::error(
            step + 1,
            format!("The run failed (ref {err_id})."),
        ))
        .await;
    }

    // The folded memory is the chat's working state for the next message,
    // cancelled or not.
    *chat.last_memory.lock() = Some(memory);

    finish(&sink, &tokens, &tracker, cancel.is_cancelled()).await;
}

async fn finish(
    sink: &EventSink,
    tokens: &Arc<Mutex<TokenBreakdown>>,
    tracker: &Arc<ChangeTracker>,
    cancelled: bool,
) {
    if cancelled {
        tracker.discard();
    }
    let commit = if cancelled {
        None
    } else {
        tracker.take_last_commit()
    };
    let usage = tokens.lock().clone();
    sink.send(AgentEvent::Done {
        usage,
        commit,
        cancelled,
    })
    .await;
}

/// Load (or rebuild) the chat's folded memory. Rebuild happens after a
/// process restart: the transcript is the durable copy.
async fn prepare_memory(ctx: &RunContext) -> Result<Memory> {
    if let Some(memory) = ctx.chat.last_memory.lock().take() {
        return Ok(memory);
    }
    let transcript = ctx.app.messages.list(&ctx.chat_id).await?;
    Ok(Memory::from_transcript(&transcript, &|name| {
        tools::collapsible(name)
    }))
}

enum ModelTurn {
    Cancelled,
    /// Provider-level stream failure (terminal for the run).
    Failed(String),
    Turn {
        thinking: String,
        thinking_signature: Option<String>,
        text: String,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
    },
}

async fn run_loop(
    ctx: &RunContext,
    mut meta: ChatMeta,
    input: &MessageInput,
    memory: &mut Memory,
    step: &mut u64,
) -> Result<()> {
    // ── Record the user turn ────────────────────────────────────────
    let mut user_blocks = vec![ContentBlock::text(&input.content)];
    if let Some((media_type, data)) = &input.image {
        user_blocks.push(ContentBlock::Image {
            media_type: media_type.clone(),
            data: data.clone(),
        });
    }
    if let Some(doc) = &input.document_id {
        user_blocks.push(ContentBlock::text(format!(
            "[attached document: {doc}]"
        )));
    }

    meta.set_preview(&input.content);
    meta.message_count += 1;
    ctx.app.chats.put(&meta).await?;
    ctx.app
        .messages
        .append(&ctx.chat_id, &ChatMessage::new(Role::User, user_blocks.clone()))
        .await?;

    if !input.context_notes.is_empty() {
        ctx.chat
            .context_notes
            .lock()
            .extend(input.context_notes.iter().cloned());
    }

    // First message: pre-load categories its keywords point at.
    if meta.message_count == 1 {
        let preload = tools::keyword_preload(&input.content);
        if !preload.is_empty() {
            tracing::debug!(chat_id = %ctx.chat_id, categories = ?preload, "keyword pre-load");
            ctx.chat.loaded_categories.lock().extend(preload);
        }
    }

    memory.begin_turn(user_blocks);

    // ── Iterate ─────────────────────────────────────────────────────
    let max_iterations = ctx.app.config.runtime.max_iterations;

    for iteration in 0..max_iterations {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        tracing::debug!(chat_id = %ctx.chat_id, iteration, "loop iteration");

        let schema = tools::build_schema(ctx);
        let system = {
            let loaded_skills = ctx.chat.loaded_skills.lock().clone();
            let context_notes = ctx.chat.context_notes.lock().clone();
            let tasks = ctx.chat.tasks.lock().snapshot();
            prompt::compose(&prompt::PromptInputs {
                mode: ctx.mode,
                persona: ctx.persona,
                skills: &ctx.app.skills,
                loaded_skills: &loaded_skills,
                context_notes: &context_notes,
                tasks: &tasks,
            })
        };

        let req = ChatRequest {
            model: ctx.app.config.llm.model.clone(),
            system,
            messages: memory.fold(),
            tools: schema,
            max_tokens: ctx.app.config.llm.max_output_tokens,
            thinking_budget: Some(ctx.app.config.llm.thinking_budget_tokens)
                .filter(|b| *b > 0),
            cache: true,
        };

        *step += 1;
        let turn_step = *step;

        let turn = stream_model_turn(ctx, &req, turn_step).await?;
        let (thinking, thinking_signature, text, tool_calls, usage) = match turn {
            ModelTurn::Cancelled => return Ok(()),
            ModelTurn::Failed(message) => {
                *step += 1;
                ctx.sink
                    .step(StepEvent::error(
                        *step,
                        format!("The model stream failed: {message}. Try sending the message again."),
                    ))
                    .await;
                return Ok(());
            }
            ModelTurn::Turn {
                thinking,
                thinking_signature,
                text,
                tool_calls,
                usage,
            } => (thinking, thinking_signature, text, tool_calls, usage),
        };

        ctx.tokens.lock().record_main(&usage);

        // Assemble and persist the assistant message.
        let mut assistant_blocks = Vec::new();
        if !thinking.is_empty() {
            assistant_blocks.push(ContentBlock::Thinking {
                text: thinking,
                signature: thinking_signature,
            });
        }
        if !text.is_empty() {
            assistant_blocks.push(ContentBlock::text(&text));
        }
        for tc in &tool_calls {
            assistant_blocks.push(ContentBlock::ToolUse {
                id: tc.call_id.clone(),
                name: tc.tool_name.clone(),
                input: tc.arguments.clone(),
            });
        }
        memory.push_assistant(assistant_blocks.clone());
        let mut assistant_msg = ChatMessage::new(Role::Assistant, assistant_blocks);
        assistant_msg.input_tokens = usage.input_tokens + usage.cache_read_tokens;
        assistant_msg.output_tokens = usage.output_tokens;
        ctx.app.messages.append(&ctx.chat_id, &assistant_msg).await?;

        // ── No tools: the text is the final answer ──────────────────
        if tool_calls.is_empty() {
            ctx.sink
                .step(StepEvent::final_answer(turn_step, text))
                .await;
            return Ok(());
        }

        // ── Read-only gate ──────────────────────────────────────────
        // Write tools are not offered in read-only mode; if the model asks
        // for one anyway, warn the user and stop before touching the
        // platform.
        if ctx.mode.is_read_only() {
            if let Some(write_call) = tool_calls.iter().find(|tc| is_write_intent(&tc.tool_name))
            {
                // Keep the transcript well-formed: every tool_use gets a
                // refusal result before the run stops.
                let refusal = json!({ "error": "refused: this chat is read-only" });
                settle_unanswered_calls(ctx, memory, &tool_calls, &refusal).await?;
                *step += 1;
                ctx.sink
                    .step(StepEvent::error(
                        *step,
                        format!(
                            "This chat is read-only, so the requested change \
                             ({}) was not attempted. Create a read-write chat \
                             or resend the message with mode \"read-write\" \
                             to apply changes.",
                            write_call.tool_name
                        ),
                    ))
                    .await;
                return Ok(());
            }
        }

        // ── Parallel tool dispatch ──────────────────────────────────
        let calls: Vec<(u64, ToolCall)> = tool_calls
            .iter()
            .cloned()
            .map(|tc| {
                *step += 1;
                (*step, tc)
            })
            .collect();

        let Some(outcomes) = tools::dispatch_parallel(ctx, calls).await else {
            // Cancelled mid-batch: settle the tool_use blocks so the next
            // message folds a well-formed transcript.
            let note = json!({ "error": "cancelled before completion" });
            settle_unanswered_calls(ctx, memory, &tool_calls, &note).await?;
            return Ok(());
        };

        let mut entries = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            ctx.app
                .messages
                .append(
                    &ctx.chat_id,
                    &ChatMessage::tool_result(
                        outcome.call.call_id.clone(),
                        outcome.result.clone(),
                        outcome.is_error,
                    ),
                )
                .await?;
            entries.push(ToolResultEntry {
                call_id: outcome.call.call_id.clone(),
                tool_name: outcome.call.tool_name.clone(),
                collapsible: tools::collapsible(&outcome.call.tool_name),
                content: outcome.result.clone(),
                is_error: outcome.is_error,
            });
        }
        memory.push_tool_results(entries);

        // ── Commit this iteration's writes ──────────────────────────
        if !ctx.cancel.is_cancelled() {
            commit_iteration(ctx).await?;
        }

        if iteration + 1 == max_iterations {
            *step += 1;
            ctx.sink
                .step(StepEvent::error(
                    *step,
                    format!("Stopped after {max_iterations} iterations without a final answer."),
                ))
                .await;
        }
    }

    Ok(())
}

/// Fold (and persist) an error result for every call in a batch that will
/// never be dispatched, so no `tool_use` block is left unpaired.
async fn settle_unanswered_calls(
    ctx: &RunContext,
    memory: &mut Memory,
    tool_calls: &[ToolCall],
    content: &serde_json::Value,
) -> Result<()> {
    let mut entries = Vec::with_capacity(tool_calls.len());
    for tc in tool_calls {
        ctx.app
            .messages
            .append(
                &ctx.chat_id,
                &ChatMessage::tool_result(tc.call_id.clone(), content.clone(), true),
            )
            .await?;
        entries.push(ToolResultEntry {
            call_id: tc.call_id.clone(),
            tool_name: tc.tool_name.clone(),
            collapsible: false,
            content: content.clone(),
            is_error: true,
        });
    }
    memory.push_tool_results(entries);
    Ok(())
}

fn is_write_intent(tool_name: &str) -> bool {
    catalog::resolve_tool(tool_name)
        .map(|(op, _)| op.is_write())
        .unwrap_or(tool_name == "revert_commit")
}

/// Stream one model call, emitting thinking/intermediate step events that
/// share `turn_step`. Later events replace earlier ones (cumulative
/// content, `is_streaming=true`).
async fn stream_model_turn(
    ctx: &RunContext,
    req: &ChatRequest,
    turn_step: u64,
) -> Result<ModelTurn> {
    let llm_timeout = std::time::Duration::from_secs(ctx.app.config.runtime.llm_timeout_secs);

    let mut stream = match ctx.app.llm.chat_stream(req).await {
        Ok(stream) => stream,
        Err(Error::Provider(message)) => return Ok(ModelTurn::Failed(message)),
        Err(e) => return Err(e),
    };

    let mut thinking = String::new();
    let mut thinking_signature = None;
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut usage = Usage::default();

    loop {
        let event = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(ModelTurn::Cancelled),
            next = tokio::time::timeout(llm_timeout, stream.next()) => match next {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => return Ok(ModelTurn::Failed("stream idle timeout".into())),
            },
        };

        match event {
            Ok(StreamEvent::ThinkingDelta { text: delta }) => {
                thinking.push_str(&delta);
                ctx.sink
                    .step(StepEvent::streaming(
                        turn_step,
                        StepType::Thinking,
                        thinking.clone(),
                    ))
                    .await;
            }
            Ok(StreamEvent::ThinkingSignature { signature }) => {
                thinking_signature = Some(signature);
            }
            Ok(StreamEvent::TextDelta { text: delta }) => {
                text.push_str(&delta);
                ctx.sink
                    .step(StepEvent::streaming(
                        turn_step,
                        StepType::Intermediate,
                        text.clone(),
                    ))
                    .await;
            }
            Ok(StreamEvent::ToolUseFinished { id, name, input }) => {
                tool_calls.push(ToolCall {
                    call_id: id,
                    tool_name: name,
                    arguments: input,
                });
            }
            Ok(StreamEvent::ToolUseStarted { .. }) | Ok(StreamEvent::ToolUseDelta { .. }) => {
                // Arguments assemble provider-side; ToolUseFinished carries
                // the full input.
            }
            Ok(StreamEvent::Done { usage: u, .. }) => {
                if let Some(u) = u {
                    usage = u;
                }
            }
            Ok(StreamEvent::Error { message }) => return Ok(ModelTurn::Failed(message)),
            Err(e) => return Ok(ModelTurn::Failed(e.to_string())),
        }
    }

    Ok(ModelTurn::Turn {
        thinking,
        thinking_signature,
        text,
        tool_calls,
        usage,
    })
}

/// Turn this iteration's tracked writes into a persisted commit with a
/// model-written message.
async fn commit_iteration(ctx: &RunContext) -> Result<()> {
    let Some((author, changes)) = ctx.tracker.take_changes() else {
        return Ok(());
    };

    let message = generate_commit_message(ctx, &changes).await;
    let commit =
        dp_domain::commit::ConfigCommit::new(&ctx.chat_id, &author, message, changes);
    tracking::persist_commit(&ctx.app.commits, &ctx.app.snapshots, &commit).await?;
    ctx.tracker.set_last_commit(commit.summary());
    Ok(())
}

/// One-line commit message from the cheap model; deterministic fallback
/// when that call fails.
async fn generate_commit_message(
    ctx: &RunContext,
    changes: &[dp_domain::commit::EntityChange],
) -> String {
    let diff: Vec<_> = changes
        .iter()
        .map(|c| {
            json!({
                "entity_type": c.entity_type,
                "entity_id": c.entity_id,
                "before": c.before,
                "after": c.after,
            })
        })
        .collect();
    let diff_text = truncate_str(&serde_json::to_string(&diff).unwrap_or_default(), 4_000);

    let req = ChatRequest {
        model: ctx.app.config.llm.commit_model.clone(),
        system: "Write a single-sentence, imperative commit message describing these \
                 configuration changes. No preamble, no quotes."
            .into(),
        messages: vec![dp_providers::PromptMessage::user(vec![ContentBlock::text(
            diff_text,
        )])],
        tools: Vec::new(),
        max_tokens: 200,
        thinking_budget: None,
        cache: false,
    };

    match ctx.app.llm.complete(&req).await {
        Ok(completion) => {
            ctx.tokens.lock().record_main(&completion.usage);
            let line = completion.text.lines().next().unwrap_or_default().trim();
            if line.is_empty() {
                fallback_message(changes)
            } else {
                line.to_string()
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "commit message generation failed, using fallback");
            fallback_message(changes)
        }
    }
}

fn fallback_message(changes: &[dp_domain::commit::EntityChange]) -> String {
    let entities: Vec<&str> = changes.iter().map(|c| c.entity_type.as_str()).collect();
    format!("Update {} ({} changes)", entities.join(", "), changes.len())
}
