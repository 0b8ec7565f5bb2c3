//! Deterministic scripted provider for tests and offline development.
//!
//! Each call to `generate`/`stream_generate` pops the next chunk script
//! from the front of the queue, so a test can pin exact event sequences —
//! including tool calls — without network access. When the queue runs
//! dry the provider emits a bare end-of-message, which reads to the
//! engine as "no tool calls, no text" (turn convergence).

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream;
use parking_lot::Mutex;

use tether_domain::Result;

use crate::catalog::ModelRecord;
use crate::provider::{ModelProvider, ProviderFlavor};
use crate::types::{ChunkStream, Completion, GenerateRequest, ModelChunk};

pub struct ScriptedProvider {
    name: String,
    flavor: ProviderFlavor,
    scripts: Mutex<VecDeque<Vec<ModelChunk>>>,
    /// The last request seen, for test inspection.
    pub last_request: Arc<Mutex<Option<GenerateRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of per-call chunk scripts.
    pub fn new(scripts: Vec<Vec<ModelChunk>>) -> Self {
        Self {
            name: "mock".into(),
            flavor: ProviderFlavor::ToolMessages,
            scripts: Mutex::new(scripts.into()),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_flavor(mut self, flavor: ProviderFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// A catalog record for this provider's single mock model.
    pub fn record(&self) -> ModelRecord {
        ModelRecord {
            id: "mock-model".into(),
            provider: self.name.clone(),
            supports_tools: true,
            supports_vision: true,
            cost_per_mtok_usd: 0.0,
        }
    }

    fn next_script(&self) -> Vec<ModelChunk> {
        self.scripts.lock().pop_front().unwrap_or_else(|| {
            vec![ModelChunk::Completed {
                finish_reason: Some("stop".into()),
            }]
        })
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn flavor(&self) -> ProviderFlavor {
        self.flavor
    }

    async fn generate(&self, req: GenerateRequest) -> Result<Completion> {
        *self.last_request.lock() = Some(req);
        let script = self.next_script();

        let mut completion = Completion::default();
        let mut partial: Vec<(String, String, String)> = Vec::new();
        for chunk in script {
            match chunk {
                ModelChunk::TextDelta { text } => completion.text.push_str(&text),
                ModelChunk::ToolCall(c) => {
                    let id = c.id.unwrap_or_else(|| format!("call-{}", partial.len()));
                    match partial.iter_mut().find(|(pid, _, _)| *pid == id) {
                        Some((_, name, input)) => {
                            if let Some(n) = c.name {
                                *name = n;
                            }
                            if let Some(frag) = c.input_fragment {
                                input.push_str(&frag);
                            }
                        }
                        None => partial.push((
                            id,
                            c.name.unwrap_or_default(),
                            c.input_fragment.unwrap_or_default(),
                        )),
                    }
                }
                ModelChunk::Completed { finish_reason } => {
                    completion.finish_reason = finish_reason;
                }
                ModelChunk::Error { message } => {
                    return Err(tether_domain::Error::Model(message));
                }
            }
        }
        completion.tool_calls = partial
            .into_iter()
            .map(|(id, name, input)| tether_domain::tool::ToolCall { id, name, input })
            .collect();
        Ok(completion)
    }

    async fn stream_generate(&self, req: GenerateRequest) -> Result<ChunkStream> {
        *self.last_request.lock() = Some(req);
        let chunks: Vec<Result<ModelChunk>> = self.next_script().into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
