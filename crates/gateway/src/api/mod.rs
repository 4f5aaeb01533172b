//! HTTP API assembly.
//!
//! - `POST /chats`                    — create chat (rate-limited 30/min)
//! - `GET  /chats`                    — list chats
//! - `GET  /chats/:id`                — chat details + transcript
//! - `DELETE /chats/:id`              — delete chat (cancels active run)
//! - `POST /chats/:id/messages`       — send message, SSE response (10/min)
//! - `POST /chats/:id/cancel`         — explicit cancel
//! - `GET  /chats/:id/files[/:name]`  — output files
//! - `GET  /chats/:id/commits`        — change log
//! - `GET  /commits/:hash`            — one commit
//! - `POST /commits/:hash/revert`     — revert a commit
//! - `GET  /health`, `GET /commands`  — service meta

pub mod auth;
pub mod chats;
pub mod files;
pub mod messages;

use std::sync::Arc;

use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;

use crate::state::AppState;

/// Build the full API router.
pub fn router(state: &AppState) -> Router<AppState> {
    let limits = &state.config.limits;

    // Per-credential token bucket allowing `per_minute` requests.
    let rate_limit = |per_minute: u32| {
        let replenish_secs = u64::from((60 / per_minute.max(1)).max(1));
        let config = GovernorConfigBuilder::default()
            .per_second(replenish_secs)
            .burst_size(per_minute)
            .key_extractor(auth::CredentialKeyExtractor)
            .finish()
            .expect("rate limit bounds are validated at startup");
        GovernorLayer {
            config: Arc::new(config),
        }
    };

    let chat_create = Router::new()
        .route("/chats", post(chats::create_chat))
        .route_layer(rate_limit(limits.chat_create_per_minute));

    let message = Router::new()
        .route("/chats/:id/messages", post(messages::post_message))
        .route_layer(rate_limit(limits.messages_per_minute));

    let rest = Router::new()
        .route("/chats", get(chats::list_chats))
        .route("/chats/:id", get(chats::get_chat))
        .route("/chats/:id", delete(chats::delete_chat))
        .route("/chats/:id/cancel", post(chats::cancel_chat))
        .route("/chats/:id/files", get(files::list_files))
        .route("/chats/:id/files/:name", get(files::download_file))
        .route("/chats/:id/commits", get(chats::list_commits))
        .route("/commits/:hash", get(chats::get_commit))
        .route("/commits/:hash/revert", post(chats::revert_commit))
        .route("/health", get(health))
        .route("/commands", get(commands));

    Router::new().merge(chat_create).merge(message).merge(rest)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Slash-command index for UI auto-complete.
async fn commands() -> Json<serde_json::Value> {
    Json(json!({
        "commands": [
            { "name": "/help", "description": "Show what this assistant can do", "usage": "/help" },
            { "name": "/mode", "description": "Show or override the chat mode for the next message", "usage": "/mode read-write" },
            { "name": "/persona", "description": "Switch between the default and cautious personas", "usage": "/persona cautious" },
            { "name": "/tasks", "description": "Show the current task board", "usage": "/tasks" },
            { "name": "/revert", "description": "Revert a configuration commit by hash", "usage": "/revert <hash>" },
        ]
    }))
}
