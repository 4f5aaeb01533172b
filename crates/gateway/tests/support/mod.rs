//! Test harness: a scripted LLM provider and an in-memory platform stub so
//! the loop invariants run without any network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use dp_domain::chat::{ChatMeta, ChatMode, Credentials, Persona};
use dp_domain::config::Config;
use dp_domain::step::AgentEvent;
use dp_domain::stream::{BoxStream, StreamEvent, Usage};
use dp_domain::Result;
use dp_gateway::runtime::agent_loop::{run_message, MessageInput};
use dp_gateway::runtime::events::{EventSink, EVENT_CHANNEL_CAPACITY};
use dp_gateway::runtime::registry::RunGuard;
use dp_gateway::state::AppState;
use dp_platform::{PlatformApi, PlatformError, PlatformFactory, PlatformResult};
use dp_providers::{ChatRequest, Completion, LlmProvider};
use dp_store::MemoryStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scripted model call.
pub enum Script {
    /// Yield these events, then end the stream.
    Events(Vec<StreamEvent>),
    /// Never yield — simulates a model call that outlives the run.
    Hang,
}

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    /// Every streamed request, for schema/prompt assertions.
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

}

pub fn usage(input: u32, output: u32) -> Usage {
    Usage {
        input_tokens: input,
        output_tokens: output,
        cache_creation_tokens: 0,
        cache_read_tokens: 0,
    }
}

/// A turn that just answers with text.
pub fn final_answer(text: &str) -> Script {
    Script::Events(vec![
        StreamEvent::TextDelta { text: text.into() },
        StreamEvent::Done {
            usage: Some(usage(10, 5)),
            stop_reason: Some("end_turn".into()),
        },
    ])
}

/// A turn that requests the given tool calls.
pub fn tool_turn(calls: &[(&str, &str, Value)]) -> Script {
    let mut events = Vec::new();
    for (id, name, args) in calls {
        events.push(StreamEvent::ToolUseStarted {
            id: (*id).into(),
            name: (*name).into(),
        });
        events.push(StreamEvent::ToolUseFinished {
            id: (*id).into(),
            name: (*name).into(),
            input: args.clone(),
        });
    }
    events.push(StreamEvent::Done {
        usage: Some(usage(20, 10)),
        stop_reason: Some("tool_use".into()),
    });
    Script::Events(events)
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| final_answer("(out of script)"));
        match script {
            Script::Events(events) => Ok(Box::pin(futures_util::stream::iter(
                events.into_iter().map(Ok),
            ))),
            Script::Hang => Ok(Box::pin(futures_util::stream::pending::<
                Result<StreamEvent>,
            >())),
        }
    }

    async fn complete(&self, _req: &ChatRequest) -> Result<Completion> {
        Ok(Completion {
            text: "Scripted commit message".into(),
            usage: usage(5, 5),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Platform stub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct StubPlatform {
    entities: Mutex<HashMap<(String, String), Value>>,
    next_id: AtomicU32,
    /// Number of upcoming patch calls that should fail with 412.
    pub fail_patches: AtomicU32,
    pub patch_calls: AtomicU32,
    pub write_calls: AtomicU32,
}

impl StubPlatform {
    pub fn seed(&self, resource: &str, id: &str, state: Value) {
        self.entities
            .lock()
            .insert((resource.to_string(), id.to_string()), state);
    }

    pub fn entity(&self, resource: &str, id: &str) -> Option<Value> {
        self.entities
            .lock()
            .get(&(resource.to_string(), id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl PlatformApi for StubPlatform {
    async fn list(&self, resource: &str, _params: &Value) -> PlatformResult<Value> {
        let items: Vec<Value> = self
            .entities
            .lock()
            .iter()
            .filter(|((r, _), _)| r == resource)
            .map(|(_, v)| v.clone())
            .collect();
        Ok(json!({ "results": items }))
    }

    async fn retrieve(&self, resource: &str, id: &str) -> PlatformResult<Value> {
        self.entity(resource, id)
            .ok_or_else(|| PlatformError::NotFound(format!("{resource}/{id}")))
    }

    async fn create(&self, resource: &str, body: &Value) -> PlatformResult<Value> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let id = match body.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => format!("gen-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        let mut entity = body.clone();
        entity["id"] = json!(id);
        self.entities
            .lock()
            .insert((resource.to_string(), id), entity.clone());
        Ok(entity)
    }

    async fn patch(&self, resource: &str, id: &str, body: &Value) -> PlatformResult<Value> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_patches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PlatformError::PreconditionFailed);
        }
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        let mut entities = self.entities.lock();
        let key = (resource.to_string(), id.to_string());
        let entity = entities
            .get_mut(&key)
            .ok_or_else(|| PlatformError::NotFound(format!("{resource}/{id}")))?;
        if let (Some(target), Some(patch)) = (entity.as_object_mut(), body.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(entity.clone())
    }

    async fn delete(&self, resource: &str, id: &str) -> PlatformResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.entities
            .lock()
            .remove(&(resource.to_string(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(format!("{resource}/{id}")))
    }
}

pub struct StubFactory(pub Arc<StubPlatform>);

impl PlatformFactory for StubFactory {
    fn connect(&self, _creds: &Credentials) -> Arc<dyn PlatformApi> {
        self.0.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub state: AppState,
    pub provider: Arc<ScriptedProvider>,
    pub platform: Arc<StubPlatform>,
    _outputs: tempfile::TempDir,
}

pub fn harness(scripts: Vec<Script>) -> Harness {
    let outputs = tempfile::tempdir().expect("tempdir");

    let mut config = Config::default();
    config.runtime.supersede_grace_ms = 500;
    config.runtime.write_stagger_ms = 10;
    config.runtime.stall_ceiling_secs = 10;
    config.runtime.tool_timeout_secs = 10;
    config.runtime.sub_agent_timeout_secs = 10;
    config.runtime.llm_timeout_secs = 10;
    config.paths.output_root = outputs.path().to_path_buf();

    let provider = Arc::new(ScriptedProvider::new(scripts));
    let platform = Arc::new(StubPlatform::default());

    let state = AppState::build(
        Arc::new(config),
        provider.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(StubFactory(platform.clone())),
    );

    Harness {
        state,
        provider,
        platform,
        _outputs: outputs,
    }
}

impl Harness {
    pub async fn create_chat(&self, mode: ChatMode) -> ChatMeta {
        let meta = ChatMeta::new(mode, Persona::Default);
        self.state.chats.put(&meta).await.expect("persist chat");
        self.state.registry.ensure_state(
            &meta,
            Credentials {
                token: "test-token".into(),
                base_url: "http://stub".into(),
            },
        );
        meta
    }

    /// Start a run without waiting for it: returns the receiver and the
    /// spawned task handle.
    pub async fn start_message(
        &self,
        meta: &ChatMeta,
        content: &str,
    ) -> (
        tokio::sync::mpsc::Receiver<AgentEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let guard: RunGuard = self.state.registry.start_run(&meta.chat_id).await;
        let cancel = guard.cancel.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let sink = EventSink::new(
            tx,
            cancel.clone(),
            std::time::Duration::from_secs(self.state.config.runtime.stall_ceiling_secs),
        );

        let app = self.state.clone();
        let chat_state = self.state.registry.state(&meta.chat_id).expect("chat state");
        let meta = meta.clone();
        let input = MessageInput {
            content: content.to_string(),
            image: None,
            document_id: None,
            context_notes: Vec::new(),
            mode: meta.mode,
            persona: meta.persona,
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run_message(app, chat_state, meta, input, sink, cancel).await;
        });
        (rx, handle)
    }

    /// Run a message to completion and collect every event through `done`.
    pub async fn send_message(&self, meta: &ChatMeta, content: &str) -> Vec<AgentEvent> {
        let (mut rx, handle) = self.start_message(meta, content).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = event.is_done();
            events.push(event);
            if done {
                break;
            }
        }
        handle.await.expect("run task");
        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event assertions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn steps(events: &[AgentEvent]) -> Vec<&dp_domain::step::StepEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Step(s) => Some(s),
            _ => None,
        })
        .collect()
}

/// The cross-cutting stream invariants: step numbers non-decreasing, every
/// tool_start paired with exactly one tool_result by call id (unless the
/// run was cancelled), tool_start before its result, done last.
pub fn assert_stream_invariants(events: &[AgentEvent]) {
    use dp_domain::step::StepType;

    let done_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_done())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(done_positions.len(), 1, "exactly one done event");
    assert_eq!(
        done_positions[0],
        events.len() - 1,
        "no events after done"
    );
    let cancelled = matches!(events.last(), Some(AgentEvent::Done { cancelled: true, .. }));

    let mut last_step = 0u64;
    let mut starts: HashMap<String, usize> = HashMap::new();
    let mut results: HashMap<String, usize> = HashMap::new();

    for step in steps(events) {
        assert!(
            step.step_number >= last_step,
            "step_number regressed: {} after {}",
            step.step_number,
            last_step
        );
        last_step = step.step_number;

        match step.step_type {
            StepType::ToolStart => {
                let id = step.tool_call_id.clone().expect("tool_start has call id");
                *starts.entry(id).or_insert(0) += 1;
            }
            StepType::ToolResult => {
                let id = step.tool_call_id.clone().expect("tool_result has call id");
                assert!(
                    starts.contains_key(&id),
                    "tool_result {id} before its tool_start"
                );
                *results.entry(id).or_insert(0) += 1;
            }
            _ => {}
        }
    }

    for (id, n) in &starts {
        assert_eq!(*n, 1, "duplicate tool_start for {id}");
        match results.get(id) {
            Some(1) => {}
            None if cancelled => {}
            other => panic!("tool_start {id} has results {other:?}"),
        }
    }
}
