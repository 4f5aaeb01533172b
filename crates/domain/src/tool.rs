//! Tool metadata: descriptors exposed to the LLM and calls coming back.

use serde::{Deserialize, Serialize};

/// Platform tool categories. The base catalog is category-free; these
/// bundles load on demand within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Annotations,
    Queues,
    Schemas,
    Hooks,
    Users,
    Rules,
    Workspaces,
    Engines,
    EmailTemplates,
    DocumentRelations,
    Relations,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 11] = [
        ToolCategory::Annotations,
        ToolCategory::Queues,
        ToolCategory::Schemas,
        ToolCategory::Hooks,
        ToolCategory::Users,
        ToolCategory::Rules,
        ToolCategory::Workspaces,
        ToolCategory::Engines,
        ToolCategory::EmailTemplates,
        ToolCategory::DocumentRelations,
        ToolCategory::Relations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolCategory::Annotations => "annotations",
            ToolCategory::Queues => "queues",
            ToolCategory::Schemas => "schemas",
            ToolCategory::Hooks => "hooks",
            ToolCategory::Users => "users",
            ToolCategory::Rules => "rules",
            ToolCategory::Workspaces => "workspaces",
            ToolCategory::Engines => "engines",
            ToolCategory::EmailTemplates => "email_templates",
            ToolCategory::DocumentRelations => "document_relations",
            ToolCategory::Relations => "relations",
        }
    }
}

impl std::str::FromStr for ToolCategory {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidArgument(format!("unknown tool category: {s}")))
    }
}

/// A tool exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
    /// `None` for built-in tools that are always available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ToolCategory>,
    /// Write tools (`false`) are excluded from the schema in read-only mode
    /// and refused at dispatch.
    pub read_only: bool,
    /// Repeated results from collapsible tools are summarized in the memory
    /// fold; only the most recent is kept in full.
    #[serde(default)]
    pub collapsible: bool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for cat in ToolCategory::ALL {
            assert_eq!(cat.as_str().parse::<ToolCategory>().unwrap(), cat);
        }
    }

    #[test]
    fn category_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&ToolCategory::EmailTemplates).unwrap(),
            "\"email_templates\""
        );
    }

    #[test]
    fn unknown_category_is_an_error() {
        assert!("invoices".parse::<ToolCategory>().is_err());
    }
}
