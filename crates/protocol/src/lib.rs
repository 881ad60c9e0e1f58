use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const REGISTRY_SCHEMA_VERSION: u32 = 1;

/// Static catalog entry describing one tool server's capability and how to
/// launch it. Descriptors are immutable after load; a registry reload
/// replaces them wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ServerDescriptor {
    /// Unique id across the registry.
    pub id: String,
    pub display_name: String,
    /// Natural-language capability summary; this is the text embedded for
    /// similarity search.
    pub capability_text: String,
    #[serde(default)]
    pub category: String,
    pub launch: LaunchTemplate,
}

impl ServerDescriptor {
    /// Text handed to the embedding service for this descriptor.
    pub fn embedding_text(&self) -> String {
        format!(
            "Server: {}\nPurpose: {}\nCategory: {}",
            self.display_name, self.capability_text, self.category
        )
    }
}

/// Declarative launch recipe. String fields may contain `{{scope:name}}`
/// placeholders resolved against the settings store; `defaults` supplies
/// values for placeholders with no matching settings key, keyed by
/// `scope.name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LaunchTemplate {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

/// One ranked match for a query. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Candidate {
    pub descriptor_id: String,
    pub similarity_score: f32,
    pub rank: usize,
}

/// Normalized query plus extracted keyword set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct Intent {
    pub normalized_query: String,
    pub keywords: BTreeSet<String>,
}

/// Outcome of one routing request. `descriptor_id = None` is a routing
/// miss (no confident match), not an error.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelectionDecision {
    pub descriptor_id: Option<String>,
    pub combined_confidence: f32,
    pub reasoning_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_tool: Option<String>,
}

impl SelectionDecision {
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            descriptor_id: None,
            combined_confidence: 0.0,
            reasoning_summary: reason.into(),
            recommended_tool: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.descriptor_id.is_some()
    }
}

/// Fully expanded launch recipe: all placeholders substituted, all
/// empty-valued fields removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ResolvedLaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Structured error payload returned by the MCP surface.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

pub mod error_codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const NO_CONFIDENT_MATCH: &str = "no_confident_match";
    pub const UNRESOLVED_PLACEHOLDER: &str = "unresolved_placeholder";
    pub const INVALID_TEMPLATE: &str = "invalid_template";
    pub const LAUNCH_FAILURE: &str = "launch_failure";
    pub const INVOCATION_FAILURE: &str = "invocation_failure";
    pub const EXTERNAL_SERVICE_UNAVAILABLE: &str = "external_service_unavailable";
    pub const SERVER_NOT_FOUND: &str = "server_not_found";
    pub const TOOL_NOT_FOUND: &str = "tool_not_found";
    pub const INTERNAL: &str = "internal";
}
