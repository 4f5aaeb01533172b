//! Output-file endpoints: list and download what the agent wrote with
//! `write_output_file`. Download paths are validated against traversal.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::api::chats::{api_error, store_error};
use crate::state::AppState;

/// GET /chats/:id/files
pub async fn list_files(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    if let Err(e) = state.chats.require(&chat_id).await {
        return store_error(e);
    }
    let Some(chat) = state.registry.state(&chat_id) else {
        return Json(json!({ "files": [] })).into_response();
    };

    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&chat.output_dir) {
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            files.push(json!({ "name": name, "size_bytes": meta.len() }));
        }
    }
    files.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Json(json!({ "files": files })).into_response()
}

/// GET /chats/:id/files/:name
pub async fn download_file(
    State(state): State<AppState>,
    Path((chat_id, name)): Path<(String, String)>,
) -> Response {
    if let Err(e) = state.chats.require(&chat_id).await {
        return store_error(e);
    }
    let Some(chat) = state.registry.state(&chat_id) else {
        return api_error(StatusCode::NOT_FOUND, "no files for this chat");
    };

    // Traversal guard: plain names only, and the resolved path must stay
    // inside the chat's output directory.
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return api_error(StatusCode::BAD_REQUEST, "invalid file name");
    }
    let path = chat.output_dir.join(&name);
    let (Ok(canonical), Ok(root)) = (path.canonicalize(), chat.output_dir.canonicalize()) else {
        return api_error(StatusCode::NOT_FOUND, format!("no such file: {name}"));
    };
    if !canonical.starts_with(&root) {
        return api_error(StatusCode::BAD_REQUEST, "invalid file name");
    }

    match std::fs::read(&canonical) {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{name}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => api_error(StatusCode::NOT_FOUND, format!("no such file: {name}")),
    }
}
