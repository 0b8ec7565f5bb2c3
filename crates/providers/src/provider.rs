//! The provider trait every model backend implements.

use tether_domain::Result;

use crate::types::{ChunkStream, Completion, GenerateRequest};

/// Message-shape class of a provider.
///
/// `AssistantOnly` providers cannot consume tool-role messages interleaved
/// with the history; the engine rewrites tool results into assistant text
/// for them before the request is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFlavor {
    ToolMessages,
    AssistantOnly,
}

#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// A unique identifier for this provider instance.
    fn name(&self) -> &str;

    fn flavor(&self) -> ProviderFlavor {
        ProviderFlavor::ToolMessages
    }

    /// Generate and wait for the full response.
    async fn generate(&self, req: GenerateRequest) -> Result<Completion>;

    /// Generate and return a stream of chunks.
    async fn stream_generate(&self, req: GenerateRequest) -> Result<ChunkStream>;
}
