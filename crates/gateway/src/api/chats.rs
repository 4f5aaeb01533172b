//! Chat lifecycle endpoints: create, list, get, delete, cancel, and the
//! commit-history surface.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use dp_domain::chat::{ChatMeta, ChatMode, Persona};
use dp_domain::Error;

use crate::api::auth;
use crate::runtime::tracking;
use crate::state::AppState;

/// Standardized JSON error body: `{ "error": "<message>" }`.
pub(super) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub(super) fn store_error(e: Error) -> Response {
    match e {
        Error::UnknownChat(id) => api_error(StatusCode::NOT_FOUND, format!("unknown chat: {id}")),
        other => {
            tracing::error!(error = %other, "store operation failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub mode: Option<ChatMode>,
    #[serde(default)]
    pub persona: Option<Persona>,
}

pub async fn create_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateChatRequest>>,
) -> Response {
    let Json(body) = body.unwrap_or_default();
    let mode = body.mode.unwrap_or(state.config.platform.mode);
    let persona = body.persona.unwrap_or_default();

    let meta = ChatMeta::new(mode, persona);
    if let Err(e) = state.chats.put(&meta).await {
        return store_error(e);
    }

    let credentials = auth::extract_credentials(&headers, &state.config);
    state.registry.ensure_state(&meta, credentials);

    tracing::info!(chat_id = %meta.chat_id, mode = mode.as_str(), "chat created");
    (
        StatusCode::CREATED,
        Json(json!({ "chat_id": meta.chat_id, "created_at": meta.created_at })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query.limit.min(100);
    match state.chats.list(limit, query.offset).await {
        Ok((chats, total)) => Json(json!({
            "chats": chats,
            "total": total,
            "limit": limit,
            "offset": query.offset,
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /chats/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_chat(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    let meta = match state.chats.require(&chat_id).await {
        Ok(meta) => meta,
        Err(e) => return store_error(e),
    };
    let messages = match state.messages.list(&chat_id).await {
        Ok(messages) => messages,
        Err(e) => return store_error(e),
    };
    Json(json!({
        "chat": meta,
        "messages": messages,
        "active": state.registry.is_running(&chat_id),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /chats/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_chat(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    if let Err(e) = state.chats.require(&chat_id).await {
        return store_error(e);
    }
    state.registry.remove_chat(&chat_id);
    if let Err(e) = state.chats.delete(&chat_id).await {
        return store_error(e);
    }
    tracing::info!(chat_id = %chat_id, "chat deleted");
    Json(json!({ "deleted": chat_id })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chats/:id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel_chat(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    if let Err(e) = state.chats.require(&chat_id).await {
        return store_error(e);
    }
    let cancelled = state.registry.cancel_run(&chat_id);
    Json(json!({ "cancelled": cancelled })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commit history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /chats/:id/commits — the chat's change log, most recent first.
pub async fn list_commits(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    if let Err(e) = state.chats.require(&chat_id).await {
        return store_error(e);
    }
    match state.commits.list_for_chat(&chat_id).await {
        Ok(commits) => Json(json!({ "commits": commits })).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /commits/:hash
pub async fn get_commit(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    match state.commits.get(&hash).await {
        Ok(Some(commit)) => Json(commit).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("commit not found: {hash}")),
        Err(e) => store_error(e),
    }
}

/// POST /commits/:hash/revert — restore the state before a commit as a new
/// forward commit. Uses the caller's credentials; requires that the chat
/// owning the commit is read-write (mode is a per-chat attribute, not the
/// server default).
pub async fn revert_commit(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Response {
    let target = match state.commits.get(&hash).await {
        Ok(Some(commit)) => commit,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, format!("commit not found: {hash}")),
        Err(e) => return store_error(e),
    };

    let owner = match state.chats.require(&target.chat_id).await {
        Ok(meta) => meta,
        Err(e) => return store_error(e),
    };
    if owner.mode.is_read_only() {
        return api_error(
            StatusCode::FORBIDDEN,
            "revert requires a read-write chat; this commit belongs to a read-only chat",
        );
    }

    let credentials = auth::extract_credentials(&headers, &state.config);
    let platform = state.platform.connect(&credentials);

    match tracking::revert_commit(
        platform.as_ref(),
        &state.commits,
        &state.snapshots,
        &target.chat_id,
        &hash,
    )
    .await
    {
        Ok(revert) => Json(json!({
            "reverted": hash,
            "commit": revert.summary(),
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}
