//! Built-in tools — always in the schema regardless of loaded categories.
//!
//! `write_output_file`, `knowledge_base_search`, `update_tasks`,
//! `load_skill`, `load_tool_category`, and (read-write only)
//! `revert_commit`.

use serde_json::{json, Value};

use dp_domain::step::AgentEvent;
use dp_domain::tool::{ToolCall, ToolCategory, ToolDescriptor};

use super::{tools, tracking, RunContext};

pub fn builtin_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "write_output_file".into(),
            description: "Write a file into this chat's output directory so the user can \
                          download it (reports, exports, generated configs)."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filename": { "type": "string", "description": "Plain file name, no directories" },
                    "content": { "type": "string", "description": "File content (UTF-8)" }
                },
                "required": ["filename", "content"]
            }),
            category: None,
            read_only: true,
            collapsible: false,
        },
        ToolDescriptor {
            name: "knowledge_base_search".into(),
            description: "Search the platform knowledge base and synthesize an answer with \
                          citations to the matching documents."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to look up" }
                },
                "required": ["query"]
            }),
            category: None,
            read_only: true,
            collapsible: true,
        },
        ToolDescriptor {
            name: "update_tasks".into(),
            description: "Maintain the visible task board: add tasks, move them through \
                          pending/in_progress/completed, or clear the board."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "add": { "type": "array", "items": { "type": "string" }, "description": "Subjects of new tasks" },
                    "set_status": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "integer" },
                                "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] }
                            },
                            "required": ["id", "status"]
                        }
                    },
                    "clear": { "type": "boolean" }
                }
            }),
            category: None,
            read_only: true,
            collapsible: false,
        },
        ToolDescriptor {
            name: "load_skill".into(),
            description: "Load a skill playbook into context for the rest of this chat.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Skill name from the skills index" }
                },
                "required": ["name"]
            }),
            category: None,
            read_only: true,
            collapsible: false,
        },
        ToolDescriptor {
            name: "load_tool_category".into(),
            description: "Load the tool bundles for one or more platform areas (annotations, \
                          queues, schemas, hooks, users, rules, workspaces, engines, \
                          email_templates, document_relations, relations). Loaded categories \
                          stay available for the rest of the chat."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "categories": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Category names to load"
                    }
                },
                "required": ["categories"]
            }),
            category: None,
            read_only: true,
            collapsible: false,
        },
        ToolDescriptor {
            name: "revert_commit".into(),
            description: "Revert a configuration commit by hash. Produces a new forward \
                          commit restoring the state before the target commit."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "hash": { "type": "string", "description": "Commit hash from the change log" }
                },
                "required": ["hash"]
            }),
            category: None,
            read_only: false,
            collapsible: false,
        },
    ]
}

pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "write_output_file"
            | "knowledge_base_search"
            | "update_tasks"
            | "load_skill"
            | "load_tool_category"
            | "revert_commit"
    )
}

/// Dispatch a built-in tool. Returns `(result, is_error)`.
pub async fn dispatch_builtin(ctx: &RunContext, call: &ToolCall) -> (Value, bool) {
    match call.tool_name.as_str() {
        "write_output_file" => write_output_file(ctx, &call.arguments).await,
        "knowledge_base_search" => knowledge_base_search(ctx, &call.arguments),
        "update_tasks" => update_tasks(ctx, &call.arguments).await,
        "load_skill" => load_skill(ctx, &call.arguments),
        "load_tool_category" => load_tool_category(ctx, &call.arguments),
        "revert_commit" => revert_commit(ctx, &call.arguments).await,
        other => (json!({ "error": format!("unknown builtin: {other}") }), true),
    }
}

async fn write_output_file(ctx: &RunContext, args: &Value) -> (Value, bool) {
    let Some(filename) = args.get("filename").and_then(Value::as_str) else {
        return (json!({ "error": "missing filename" }), true);
    };
    let Some(content) = args.get("content").and_then(Value::as_str) else {
        return (json!({ "error": "missing content" }), true);
    };
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return (
            json!({ "error": "filename must be a plain name without directories" }),
            true,
        );
    }

    let dir = &ctx.chat.output_dir;
    if let Err(e) = std::fs::create_dir_all(dir) {
        return (json!({ "error": format!("cannot create output dir: {e}") }), true);
    }
    let path = dir.join(filename);
    if let Err(e) = std::fs::write(&path, content) {
        return (json!({ "error": format!("write failed: {e}") }), true);
    }

    let size_bytes = content.len() as u64;
    ctx.sink
        .send(AgentEvent::FileCreated {
            name: filename.to_string(),
            size_bytes,
        })
        .await;

    (json!({ "filename": filename, "size_bytes": size_bytes }), false)
}

/// Plain keyword search over the knowledge base. The analysis layer on top
/// is a sub-agent (see `subagent`); inside that sub-agent this is the raw
/// lookup it iterates on.
fn knowledge_base_search(ctx: &RunContext, args: &Value) -> (Value, bool) {
    let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
    if query.is_empty() {
        return (json!({ "error": "missing query" }), true);
    }
    let hits: Vec<Value> = ctx
        .app
        .knowledge
        .search(query, 5)
        .into_iter()
        .map(|h| json!({ "doc": h.name, "score": h.score, "snippet": h.snippet }))
        .collect();
    (json!({ "query": query, "results": hits }), false)
}

async fn update_tasks(ctx: &RunContext, args: &Value) -> (Value, bool) {
    let snapshot = {
        let mut board = ctx.chat.tasks.lock();
        if let Err(e) = board.apply(args) {
            return (json!({ "error": e }), true);
        }
        board.snapshot()
    };
    ctx.sink
        .send(AgentEvent::TaskSnapshot {
            tasks: snapshot.clone(),
        })
        .await;
    (json!({ "tasks": snapshot }), false)
}

fn load_skill(ctx: &RunContext, args: &Value) -> (Value, bool) {
    let Some(name) = args.get("name").and_then(Value::as_str) else {
        return (json!({ "error": "missing name" }), true);
    };
    if ctx.app.skills.get(name).is_none() {
        return (
            json!({
                "error": format!("unknown skill: {name}"),
                "available": ctx.app.skills.summaries(),
            }),
            true,
        );
    }
    let mut loaded = ctx.chat.loaded_skills.lock();
    if !loaded.iter().any(|s| s == name) {
        loaded.push(name.to_string());
    }
    (json!({ "loaded": name }), false)
}

fn load_tool_category(ctx: &RunContext, args: &Value) -> (Value, bool) {
    let Some(categories) = args.get("categories").and_then(Value::as_array) else {
        return (json!({ "error": "missing categories" }), true);
    };

    let mut parsed: Vec<ToolCategory> = Vec::new();
    for cat in categories {
        let Some(name) = cat.as_str() else {
            return (json!({ "error": "categories must be strings" }), true);
        };
        match name.parse::<ToolCategory>() {
            Ok(c) => parsed.push(c),
            Err(_) => {
                return (
                    json!({
                        "error": format!("unknown category: {name}"),
                        "available": ToolCategory::ALL.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
                    }),
                    true,
                );
            }
        }
    }

    {
        let mut loaded = ctx.chat.loaded_categories.lock();
        loaded.extend(parsed.iter().copied());
    }

    let tool_names: Vec<String> = tools::category_descriptors(&parsed, ctx.mode)
        .into_iter()
        .map(|d| d.name)
        .collect();
    tracing::info!(
        chat_id = %ctx.chat_id,
        categories = ?parsed.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
        "tool categories loaded"
    );
    (json!({ "loaded": parsed, "tools": tool_names }), false)
}

async fn revert_commit(ctx: &RunContext, args: &Value) -> (Value, bool) {
    if ctx.mode.is_read_only() {
        return (json!({ "error": "revert requires read-write mode" }), true);
    }
    let Some(hash) = args.get("hash").and_then(Value::as_str) else {
        return (json!({ "error": "missing hash" }), true);
    };

    match tracking::revert_commit(
        ctx.platform.as_ref(),
        &ctx.app.commits,
        &ctx.app.snapshots,
        &ctx.chat_id,
        hash,
    )
    .await
    {
        Ok(commit) => {
            let summary = commit.summary();
            ctx.tracker.set_last_commit(summary.clone());
            (serde_json::to_value(summary).unwrap_or(Value::Null), false)
        }
        Err(e) => (json!({ "error": e.to_string() }), true),
    }
}
