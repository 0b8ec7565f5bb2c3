//! Conversation messages and their parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{self, Prefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a message. Attachment-backed parts carry a `ref` that is a
/// session-storage-relative POSIX path under `attachments/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "ref")]
        reference: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    File {
        #[serde(rename = "ref")]
        reference: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Marker for a tool call emitted by the assistant.
    ToolCall {
        id: String,
        name: String,
        input: String,
    },
    /// Marker for a tool result carried by a tool-role message.
    ToolResult {
        id: String,
        ok: bool,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
    /// For tool-role messages: the id of the tool call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: id::mint(Prefix::Message),
            role,
            parts,
            created_at: Utc::now(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![MessagePart::text(text)])
    }

    pub fn tool(tool_call_id: impl Into<String>, parts: Vec<MessagePart>) -> Self {
        let mut msg = Self::new(Role::Tool, parts);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
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
