//! `POST /chats/:id/messages` — dispatch a message and stream the run as
//! Server-Sent Events.
//!
//! Frame format: `event: <name>\ndata: <json>\n\n`, keepalive comment
//! `:ka` every `runtime.keepalive_secs`. The keepalive is driven by axum's
//! SSE timer and carries no per-chat state; everything mutable lives in
//! the shared registry, so detached timers can never hold a stale copy.
//!
//! Client disconnect drops the stream, which trips this run's cancel token
//! via a drop guard; the agent loop notices at its next suspension point.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use dp_domain::chat::{ChatMode, Persona};
use dp_domain::step::AgentEvent;

use crate::api::auth;
use crate::api::chats::{api_error, store_error};
use crate::runtime::agent_loop::{run_message, MessageInput};
use crate::runtime::events::{EventSink, EVENT_CHANNEL_CAPACITY};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
    #[serde(default)]
    pub mode: Option<ChatMode>,
    #[serde(default)]
    pub persona: Option<Persona>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    /// Base64 image shown to the model.
    Image { media_type: String, data: String },
    /// Platform document to ground the conversation on.
    Document { id: String },
    /// Pinned context carried in the system prompt (URLs, plan text).
    Context { text: String },
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<MessageRequest>,
) -> Response {
    if body.content.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "content must not be empty");
    }

    let meta = match state.chats.require(&chat_id).await {
        Ok(meta) => meta,
        Err(e) => return store_error(e),
    };

    let credentials = auth::extract_credentials(&headers, &state.config);
    let chat_state = state.registry.ensure_state(&meta, credentials);

    let mut input = MessageInput {
        content: body.content,
        image: None,
        document_id: None,
        context_notes: Vec::new(),
        mode: body.mode.unwrap_or(meta.mode),
        persona: body.persona.unwrap_or(meta.persona),
    };
    for attachment in body.attachments {
        match attachment {
            Attachment::Image { media_type, data } => input.image = Some((media_type, data)),
            Attachment::Document { id } => input.document_id = Some(id),
            Attachment::Context { text } => input.context_notes.push(text),
        }
    }

    // Supersession: an in-flight run for this chat is cancelled and given
    // the grace period before we take the slot.
    let guard = state.registry.start_run(&chat_id).await;
    let cancel = guard.cancel.clone();

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let sink = EventSink::new(
        tx,
        cancel.clone(),
        Duration::from_secs(state.config.runtime.stall_ceiling_secs),
    );

    let span = tracing::info_span!("run", chat_id = %chat_id, run_id = %guard.run_id);
    let app = state.clone();
    let loop_cancel = cancel.clone();
    tokio::spawn(
        async move {
            // The guard lives for the whole run; dropping it signals
            // completion to any superseder waiting in start_run.
            let _guard = guard;
            run_message(app, chat_state, meta, input, sink, loop_cancel).await;
        }
        .instrument(span),
    );

    let keepalive = Duration::from_secs(state.config.runtime.keepalive_secs);
    Sse::new(event_stream(rx, cancel))
        .keep_alive(KeepAlive::new().interval(keepalive).text("ka"))
        .into_response()
}

/// Cancels the run when the stream is dropped before `done` (client
/// disconnect or proxy reset).
struct DisconnectGuard {
    cancel: CancellationToken,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!("client disconnected before done, cancelling run");
            self.cancel.cancel();
        }
    }
}

fn event_stream(
    mut rx: mpsc::Receiver<AgentEvent>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut guard = DisconnectGuard { cancel, finished: false };

        // Initial comment frame: confirms the stream is live before the
        // first real event.
        yield Ok(Event::default().comment("stream open"));

        while let Some(event) = rx.recv().await {
            let is_done = event.is_done();
            let name = event.sse_name();
            let data = serde_json::to_string(&event).unwrap_or_else(|e| {
                tracing::error!(error = %e, "unserializable agent event");
                "{}".to_string()
            });
            yield Ok(Event::default().event(name).data(data));
            if is_done {
                // Terminal: nothing may follow `done` for this request.
                guard.finished = true;
                break;
            }
        }
    }
}
