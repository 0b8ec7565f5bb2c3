//! Tool contracts shared by the registry, the executors, and the transport.
//!
//! The engine treats a tool's `input` as an opaque JSON string; each tool
//! parses it against its own schema at the invocation boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::MessagePart;

/// Capability class of a tool. `write` and `exec` calls mark the workspace
/// dirty and fall under the default approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Read,
    Write,
    Exec,
    Network,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
    pub kind: ToolKind,
    #[serde(default)]
    pub requires_approval: bool,
    /// When set, the call bypasses the approval gate even if the session
    /// policy names the tool's kind.
    #[serde(default)]
    pub allow_without_approval: bool,
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, parsed by the tool itself.
    pub input: String,
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub ok: bool,
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: true,
            parts: vec![MessagePart::text(text)],
            artifacts: Vec::new(),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            id: id.into(),
            ok: false,
            parts: vec![MessagePart::text(&error)],
            artifacts: Vec::new(),
            error: Some(error),
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
