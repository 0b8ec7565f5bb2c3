//! Provider kit: the contract between the executors and LLM backends.
//!
//! The daemon core never speaks a provider wire protocol; it consumes this
//! crate's [`ModelProvider`] trait and model catalog. Adapters for real
//! backends live outside the core — the [`mock::ScriptedProvider`] ships
//! here so every crate can run deterministic end-to-end traces.

pub mod catalog;
pub mod mock;
pub mod provider;
pub mod types;

pub use catalog::{ModelRecord, ProviderKit, Resolution};
pub use provider::{ModelProvider, ProviderFlavor};
pub use types::{
    BoxStream, ChunkStream, Completion, GenerateRequest, ModelChunk, PromptMessage, PromptPart,
    ToolCallChunk,
};
