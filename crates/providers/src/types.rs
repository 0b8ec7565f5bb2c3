//! Provider-agnostic request, response, and streaming types.

use std::pin::Pin;

use serde::{Deserialize, Serialize};

use tether_domain::message::Role;
use tether_domain::tool::{ToolCall, ToolDefinition};

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The stream type returned by [`crate::ModelProvider::stream_generate`].
pub type ChunkStream = BoxStream<'static, tether_domain::Result<ModelChunk>>;

/// One assembled, provider-ready message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    /// For tool-role messages: the id of the call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub parts: Vec<PromptPart>,
}

impl PromptMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            tool_call_id: None,
            parts: vec![PromptPart::Text { text: text.into() }],
        }
    }

    /// Concatenated text of all text parts.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text { text } => Some(text.as_str()),
                PromptPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptPart {
    Text { text: String },
    /// Inline image content, already materialized from its attachment.
    Image { media_type: String, base64: String },
}

/// A chat generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub messages: Vec<PromptMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model id override; `None` lets the provider pick its default.
    pub model: Option<String>,
}

/// A fully aggregated (non-streaming) generation result.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

/// Incremental output from a streaming generation.
///
/// Tool calls arrive as chunks that are merged by call id: the first chunk
/// for an id usually carries the name, later chunks append input
/// fragments. A chunk without an id belongs to a fresh call.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    TextDelta {
        text: String,
    },
    ToolCall(ToolCallChunk),
    /// End of the assistant message.
    Completed {
        finish_reason: Option<String>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallChunk {
    pub id: Option<String>,
    pub name: Option<String>,
    pub input_fragment: Option<String>,
}

impl ToolCallChunk {
    pub fn full(id: impl Into<String>, name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            input_fragment: Some(input.into()),
        }
    }
}
