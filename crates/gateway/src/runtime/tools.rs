//! The tool runtime: schema assembly, dynamic category loading, argument
//! validation, read-only gating, and (parallel) dispatch.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{json, Map, Value};

use dp_domain::chat::ChatMode;
use dp_domain::step::StepEvent;
use dp_domain::tool::{ToolCall, ToolCategory, ToolDescriptor};
use dp_platform::catalog::{self, Operation};
use dp_platform::PlatformError;

use super::{builtins, subagent, RunContext};

/// Whether repeated results of this tool collapse in the memory fold.
pub fn collapsible(tool_name: &str) -> bool {
    tool_name.starts_with("list_") || tool_name == "knowledge_base_search"
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extra schema-category tooling beyond the generated CRUD bundle.
fn schema_extras() -> Vec<ToolDescriptor> {
    vec![ToolDescriptor {
        name: "suggest_lookup_field".into(),
        description: "Suggest a lookup-field configuration for a schema: analyzes the \
                      schema and related docs and proposes field settings."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "schema_id": { "type": "string", "description": "Schema to extend" },
                "description": { "type": "string", "description": "What the field should look up" }
            },
            "required": ["schema_id", "description"]
        }),
        category: Some(ToolCategory::Schemas),
        read_only: true,
        collapsible: false,
    }]
}

/// Descriptors for a set of categories, filtered by mode.
pub fn category_descriptors(
    categories: &[ToolCategory],
    mode: ChatMode,
) -> Vec<ToolDescriptor> {
    let mut defs = Vec::new();
    for cat in categories {
        defs.extend(catalog::category_tools(*cat));
        if *cat == ToolCategory::Schemas {
            defs.extend(schema_extras());
        }
    }
    if mode.is_read_only() {
        defs.retain(|d| d.read_only);
    }
    defs
}

/// The full tool schema for the next model call: built-ins plus the chat's
/// loaded categories. In read-only mode write tools are absent entirely.
/// A sub-agent's restricted surface takes precedence.
pub fn build_schema(ctx: &RunContext) -> Vec<ToolDescriptor> {
    if let Some(surface) = &ctx.surface {
        let mut defs: Vec<ToolDescriptor> = surface.as_ref().clone();
        if ctx.mode.is_read_only() {
            defs.retain(|d| d.read_only);
        }
        return defs;
    }
    let mut defs: Vec<ToolDescriptor> = builtins::builtin_descriptors();
    if ctx.mode.is_read_only() {
        defs.retain(|d| d.read_only);
    }
    let loaded: Vec<ToolCategory> = ctx.chat.loaded_categories.lock().iter().copied().collect();
    defs.extend(category_descriptors(&loaded, ctx.mode));
    defs
}

/// Keyword-based category pre-loading from the user's first message.
pub fn keyword_preload(text: &str) -> BTreeSet<ToolCategory> {
    const KEYWORDS: &[(&str, ToolCategory)] = &[
        ("queue", ToolCategory::Queues),
        ("schema", ToolCategory::Schemas),
        ("field", ToolCategory::Schemas),
        ("hook", ToolCategory::Hooks),
        ("webhook", ToolCategory::Hooks),
        ("extension", ToolCategory::Hooks),
        ("user", ToolCategory::Users),
        ("rule", ToolCategory::Rules),
        ("workspace", ToolCategory::Workspaces),
        ("engine", ToolCategory::Engines),
        ("email", ToolCategory::EmailTemplates),
        ("template", ToolCategory::EmailTemplates),
        ("annotation", ToolCategory::Annotations),
        ("document", ToolCategory::Annotations),
        ("relation", ToolCategory::Relations),
    ];

    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .filter(|(kw, _)| lower.contains(kw))
        .map(|(_, cat)| *cat)
        .collect()
}

/// Find the descriptor for a tool that is currently in the chat's surface.
pub fn find_descriptor(ctx: &RunContext, name: &str) -> Option<ToolDescriptor> {
    build_schema(ctx).into_iter().find(|d| d.name == name)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Validate arguments against the descriptor's JSON schema: required keys
/// present, declared primitive types respected.
pub fn validate_args(descriptor: &ToolDescriptor, args: &Value) -> Result<(), String> {
    let Some(args_map) = args.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    let schema = &descriptor.parameters;
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required {
            let key = key.as_str().unwrap_or_default();
            if !args_map.contains_key(key) {
                return Err(format!("missing required argument: {key}"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in args_map {
            if let Some(expected) = props
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            {
                if !type_matches(expected, value) {
                    return Err(format!("argument {key} must be of type {expected}"));
                }
            }
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn platform_error_result(e: &PlatformError) -> Value {
    let kind = match e {
        PlatformError::PreconditionFailed => "precondition_failed",
        PlatformError::RateLimited => "rate_limited",
        PlatformError::Server { .. } => "server_error",
        PlatformError::Auth(_) => "auth",
        PlatformError::NotFound(_) => "not_found",
        PlatformError::Client { .. } => "client_error",
        PlatformError::Network(_) => "network",
        PlatformError::Decode(_) => "decode",
    };
    json!({ "error": e.to_string(), "kind": kind })
}

/// Cache entities found in a list response so later pre-reads hit.
fn cache_list_items(ctx: &RunContext, entity_type: &str, result: &Value) {
    let items = result
        .get("results")
        .and_then(Value::as_array)
        .or_else(|| result.as_array());
    if let Some(items) = items {
        for item in items {
            if let Some(id) = item.get("id") {
                let id = match id {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                ctx.tracker.note_read(entity_type, &id, item);
            }
        }
    }
}

/// Route one validated tool call. No timeout or cancellation here — the
/// caller wraps those.
pub async fn dispatch_tool(ctx: &RunContext, call: &ToolCall) -> (Value, bool) {
    let Some(descriptor) = find_descriptor(ctx, &call.tool_name) else {
        // A write tool requested in read-only mode is absent from the
        // schema; name the real reason instead of "unknown tool".
        let is_known_write = catalog::resolve_tool(&call.tool_name)
            .map(|(op, _)| op.is_write())
            .unwrap_or(call.tool_name == "revert_commit");
        if ctx.mode.is_read_only() && is_known_write {
            return (
                json!({ "error": "this chat is read-only; write tools are disabled" }),
                true,
            );
        }
        return (
            json!({
                "error": format!("unknown tool: {}", call.tool_name),
                "hint": "load the relevant category with load_tool_category first",
            }),
            true,
        );
    };

    if let Err(e) = validate_args(&descriptor, &call.arguments) {
        return (json!({ "error": e }), true);
    }

    // The schema already excludes write tools in read-only mode; refuse at
    // dispatch as well in case a stale call slips through.
    if ctx.mode.is_read_only() && !descriptor.read_only {
        return (
            json!({ "error": "this chat is read-only; write tools are disabled" }),
            true,
        );
    }

    // Sub-agent tools get a nested loop — but never from within one.
    if !ctx.in_sub_agent && subagent::spec_for(&call.tool_name).is_some() {
        return Box::pin(subagent::run(ctx, call)).await;
    }

    if builtins::is_builtin(&call.tool_name) {
        return builtins::dispatch_builtin(ctx, call).await;
    }

    let Some((op, spec)) = catalog::resolve_tool(&call.tool_name) else {
        return (
            json!({ "error": format!("tool {} has no dispatcher", call.tool_name) }),
            true,
        );
    };

    match op {
        Operation::List => {
            let mut params = Map::new();
            if let Some(filters) = call.arguments.get("filters").and_then(Value::as_object) {
                params.extend(filters.clone());
            }
            if let Some(size) = call.arguments.get("page_size") {
                params.insert("page_size".into(), size.clone());
            }
            match ctx.platform.list(spec.plural, &Value::Object(params)).await {
                Ok(result) => {
                    cache_list_items(ctx, spec.singular, &result);
                    (result, false)
                }
                Err(e) => (platform_error_result(&e), true),
            }
        }
        Operation::Get => {
            let id = match call.arguments.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return (json!({ "error": "missing required argument: id" }), true),
            };
            match ctx.platform.retrieve(spec.plural, &id).await {
                Ok(result) => {
                    ctx.tracker.note_read(spec.singular, &id, &result);
                    (result, false)
                }
                Err(e) => (platform_error_result(&e), true),
            }
        }
        Operation::Create | Operation::Patch | Operation::Delete => {
            match ctx
                .tracker
                .tracked_write(
                    ctx.platform.as_ref(),
                    op,
                    spec,
                    &call.tool_name,
                    &call.arguments,
                )
                .await
            {
                Ok(result) => (result, false),
                Err(e) => (platform_error_result(&e), true),
            }
        }
    }
}

/// One completed dispatch, in input order.
pub struct DispatchOutcome {
    pub call: ToolCall,
    pub step_number: u64,
    pub result: Value,
    pub is_error: bool,
}

fn is_write_tool(ctx: &RunContext, name: &str) -> Option<ToolCategory> {
    let d = find_descriptor(ctx, name)?;
    (!d.read_only).then_some(d.category).flatten()
}

/// Dispatch a batch of tool calls concurrently.
///
/// Every `tool_start` precedes every `tool_result`; results reach the
/// stream in completion order while the returned outcomes stay in input
/// order for memory folding. Writes against the same category are
/// staggered to dodge downstream conflicts. Returns `None` when the run
/// was cancelled mid-batch.
pub async fn dispatch_parallel(
    ctx: &RunContext,
    calls: Vec<(u64, ToolCall)>,
) -> Option<Vec<DispatchOutcome>> {
    let stagger = Duration::from_millis(ctx.app.config.runtime.write_stagger_ms);

    // Per-category write counters decide each call's dispatch delay.
    let mut write_counts: std::collections::HashMap<ToolCategory, u32> =
        std::collections::HashMap::new();
    let delays: Vec<Duration> = calls
        .iter()
        .map(|(_, call)| match is_write_tool(ctx, &call.tool_name) {
            Some(category) => {
                let n = write_counts.entry(category).or_insert(0);
                let delay = stagger * *n;
                *n += 1;
                delay
            }
            None => Duration::ZERO,
        })
        .collect();

    // All tool_start events go out before any dispatch so consumers see
    // the full batch; results then arrive in completion order.
    for (step_number, call) in &calls {
        if ctx.cancel.is_cancelled() {
            return None;
        }
        ctx.sink
            .step(StepEvent::tool_start(
                *step_number,
                call.call_id.clone(),
                call.tool_name.clone(),
                call.arguments.clone(),
            ))
            .await;
    }

    let futures: Vec<_> = calls
        .into_iter()
        .zip(delays)
        .map(|((step_number, call), delay)| {
            let ctx = ctx.clone();
            async move {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                let timeout = if subagent::spec_for(&call.tool_name).is_some() {
                    Duration::from_secs(ctx.app.config.runtime.sub_agent_timeout_secs)
                } else {
                    Duration::from_secs(ctx.app.config.runtime.tool_timeout_secs)
                };

                let (result, is_error) = tokio::select! {
                    _ = ctx.cancel.cancelled() => return None,
                    outcome = tokio::time::timeout(timeout, dispatch_tool(&ctx, &call)) => {
                        outcome.unwrap_or_else(|_| {
                            (
                                json!({ "error": format!("tool timed out after {}s", timeout.as_secs()) }),
                                true,
                            )
                        })
                    }
                };

                ctx.sink
                    .step(StepEvent::tool_result(
                        step_number,
                        call.call_id.clone(),
                        call.tool_name.clone(),
                        result.clone(),
                        is_error,
                    ))
                    .await;

                Some(DispatchOutcome {
                    call,
                    step_number,
                    result,
                    is_error,
                })
            }
        })
        .collect();

    let outcomes = futures_util::future::join_all(futures).await;
    outcomes.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_preload_maps_terms() {
        let cats = keyword_preload("Can you patch the invoice schema for my intake queue?");
        assert!(cats.contains(&ToolCategory::Schemas));
        assert!(cats.contains(&ToolCategory::Queues));
        assert!(!cats.contains(&ToolCategory::Hooks));
    }

    #[test]
    fn keyword_preload_empty_for_smalltalk() {
        assert!(keyword_preload("hello there").is_empty());
    }

    #[test]
    fn collapsible_covers_lists_and_kb() {
        assert!(collapsible("list_queues"));
        assert!(collapsible("knowledge_base_search"));
        assert!(!collapsible("get_queue"));
        assert!(!collapsible("patch_schema"));
    }

    #[test]
    fn validate_rejects_missing_required() {
        let desc = ToolDescriptor {
            name: "t".into(),
            description: String::new(),
            parameters: json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }),
            category: None,
            read_only: true,
            collapsible: false,
        };
        assert!(validate_args(&desc, &json!({"id": "x"})).is_ok());
        assert!(validate_args(&desc, &json!({})).is_err());
        assert!(validate_args(&desc, &json!({"id": 5})).is_err());
        assert!(validate_args(&desc, &json!("not an object")).is_err());
    }

    #[test]
    fn category_descriptors_filter_writes_in_read_only() {
        let all = category_descriptors(&[ToolCategory::Queues], ChatMode::ReadWrite);
        assert!(all.iter().any(|d| d.name == "patch_queue"));

        let ro = category_descriptors(&[ToolCategory::Queues], ChatMode::ReadOnly);
        assert!(ro.iter().all(|d| d.read_only));
        assert!(!ro.iter().any(|d| d.name == "patch_queue"));
    }

    #[test]
    fn schemas_category_includes_lookup_suggestion() {
        let defs = category_descriptors(&[ToolCategory::Schemas], ChatMode::ReadOnly);
        assert!(defs.iter().any(|d| d.name == "suggest_lookup_field"));
    }
}
