//! The platform resource catalog.
//!
//! The platform's configuration surface is uniform REST, so the per-category
//! tool bundles are generated from one table instead of hand-writing fifty
//! descriptors. The tool runtime loads a category's bundle on demand and
//! maps tool names back to operations at dispatch time.

use serde_json::json;

use dp_domain::tool::{ToolCategory, ToolDescriptor};

/// One platform resource and the operations it supports.
pub struct ResourceSpec {
    pub category: ToolCategory,
    pub singular: &'static str,
    pub plural: &'static str,
    pub description: &'static str,
    /// Engines are platform-managed: list/get only.
    pub writable: bool,
}

pub const RESOURCES: &[ResourceSpec] = &[
    ResourceSpec {
        category: ToolCategory::Annotations,
        singular: "annotation",
        plural: "annotations",
        description: "extracted document data awaiting review",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::Queues,
        singular: "queue",
        plural: "queues",
        description: "document intake queues",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::Schemas,
        singular: "schema",
        plural: "schemas",
        description: "extraction schemas (field definitions)",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::Hooks,
        singular: "hook",
        plural: "hooks",
        description: "webhooks and serverless extensions",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::Users,
        singular: "user",
        plural: "users",
        description: "platform user accounts",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::Rules,
        singular: "rule",
        plural: "rules",
        description: "validation and automation rules",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::Workspaces,
        singular: "workspace",
        plural: "workspaces",
        description: "workspaces grouping queues",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::Engines,
        singular: "engine",
        plural: "engines",
        description: "extraction engines (managed, read-only)",
        writable: false,
    },
    ResourceSpec {
        category: ToolCategory::EmailTemplates,
        singular: "email_template",
        plural: "email_templates",
        description: "outbound email templates",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::DocumentRelations,
        singular: "document_relation",
        plural: "document_relations",
        description: "links between documents",
        writable: true,
    },
    ResourceSpec {
        category: ToolCategory::Relations,
        singular: "relation",
        plural: "relations",
        description: "links between annotations (e.g. duplicates, attachments)",
        writable: true,
    },
];

/// REST operation behind a generated tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Patch,
    Delete,
}

impl Operation {
    pub fn is_write(self) -> bool {
        matches!(self, Operation::Create | Operation::Patch | Operation::Delete)
    }
}

pub fn spec_for(category: ToolCategory) -> &'static ResourceSpec {
    RESOURCES
        .iter()
        .find(|r| r.category == category)
        .expect("every category has a resource spec")
}

/// Look up a resource by its entity-type name (the singular), e.g. when
/// replaying commit changes.
pub fn spec_for_entity(singular: &str) -> Option<&'static ResourceSpec> {
    RESOURCES.iter().find(|r| r.singular == singular)
}

/// Generate the tool bundle for one category.
pub fn category_tools(category: ToolCategory) -> Vec<ToolDescriptor> {
    let spec = spec_for(category);
    let mut tools = vec![
        ToolDescriptor {
            name: format!("list_{}", spec.plural),
            description: format!(
                "List {} ({}). Supports field filters and paging.",
                spec.plural, spec.description
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filters": {
                        "type": "object",
                        "description": "Field filters, e.g. {\"status\": \"active\"}",
                        "additionalProperties": true
                    },
                    "page_size": { "type": "integer", "description": "Max results (default 20)" }
                }
            }),
            category: Some(category),
            read_only: true,
            collapsible: true,
        },
        ToolDescriptor {
            name: format!("get_{}", spec.singular),
            description: format!("Fetch one {} by id.", spec.singular),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Entity id" }
                },
                "required": ["id"]
            }),
            category: Some(category),
            read_only: true,
            collapsible: false,
        },
    ];

    if spec.writable {
        tools.push(ToolDescriptor {
            name: format!("create_{}", spec.singular),
            description: format!("Create a {} from a full entity body.", spec.singular),
            parameters: json!({
                "type": "object",
                "properties": {
                    "data": { "type": "object", "description": "Entity body", "additionalProperties": true }
                },
                "required": ["data"]
            }),
            category: Some(category),
            read_only: false,
            collapsible: false,
        });
        tools.push(ToolDescriptor {
            name: format!("patch_{}", spec.singular),
            description: format!(
                "Partially update a {}; only the provided fields change.",
                spec.singular
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Entity id" },
                    "data": { "type": "object", "description": "Fields to change", "additionalProperties": true }
                },
                "required": ["id", "data"]
            }),
            category: Some(category),
            read_only: false,
            collapsible: false,
        });
        tools.push(ToolDescriptor {
            name: format!("delete_{}", spec.singular),
            description: format!("Delete a {} by id. Irreversible on the platform side.", spec.singular),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Entity id" }
                },
                "required": ["id"]
            }),
            category: Some(category),
            read_only: false,
            collapsible: false,
        });
    }

    tools
}

/// Resolve a generated tool name back to its operation and resource.
/// Returns `None` for built-in (non-catalog) tools.
pub fn resolve_tool(name: &str) -> Option<(Operation, &'static ResourceSpec)> {
    for spec in RESOURCES {
        if name == format!("list_{}", spec.plural) {
            return Some((Operation::List, spec));
        }
        if name == format!("get_{}", spec.singular) {
            return Some((Operation::Get, spec));
        }
        if spec.writable {
            if name == format!("create_{}", spec.singular) {
                return Some((Operation::Create, spec));
            }
            if name == format!("patch_{}", spec.singular) {
                return Some((Operation::Patch, spec));
            }
            if name == format!("delete_{}", spec.singular) {
                return Some((Operation::Delete, spec));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_a_spec() {
        for cat in ToolCategory::ALL {
            let _ = spec_for(cat);
        }
    }

    #[test]
    fn writable_category_has_five_tools() {
        let tools = category_tools(ToolCategory::Queues);
        assert_eq!(tools.len(), 5);
        assert!(tools.iter().any(|t| t.name == "patch_queue" && !t.read_only));
        assert!(tools.iter().any(|t| t.name == "list_queues" && t.collapsible));
    }

    #[test]
    fn engines_are_read_only() {
        let tools = category_tools(ToolCategory::Engines);
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().all(|t| t.read_only));
        assert!(resolve_tool("patch_engine").is_none());
    }

    #[test]
    fn resolve_distinguishes_relation_kinds() {
        let (op, spec) = resolve_tool("get_document_relation").unwrap();
        assert_eq!(op, Operation::Get);
        assert_eq!(spec.category, ToolCategory::DocumentRelations);

        let (op, spec) = resolve_tool("get_relation").unwrap();
        assert_eq!(op, Operation::Get);
        assert_eq!(spec.category, ToolCategory::Relations);
    }

    #[test]
    fn builtin_names_do_not_resolve() {
        assert!(resolve_tool("write_output_file").is_none());
        assert!(resolve_tool("load_tool_category").is_none());
    }

    #[test]
    fn write_operations_flagged() {
        assert!(Operation::Patch.is_write());
        assert!(Operation::Delete.is_write());
        assert!(!Operation::List.is_write());
    }
}
