//! Tool registry and the default tool set.
//!
//! A tool is a named, typed capability the model may invoke. Tools are
//! bound to a workspace root; every path coming out of tool input is
//! routed through `safe_join` before it touches the filesystem.

pub mod files;
pub mod git;
pub mod registry;
pub mod repo;
pub mod shell;
pub mod spec;

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use tether_domain::tool::{ToolCall, ToolDefinition, ToolResult};
use tether_domain::CancelToken;

pub use registry::ToolRegistry;

/// A named, typed capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn invoke(&self, call: &ToolCall, cancel: &CancelToken) -> ToolResult;
}

/// Shared binding for the built-in tools.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// All tool file access is confined to this root.
    pub workspace: PathBuf,
    /// Commands run by the `verify` tool, in order.
    pub verify_commands: Vec<String>,
}

impl ToolContext {
    pub fn new(workspace: impl Into<PathBuf>, verify_commands: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            workspace: workspace.into(),
            verify_commands,
        })
    }
}

/// Build the default registry bound to a workspace.
pub fn default_registry(ctx: Arc<ToolContext>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.add(Arc::new(repo::RepoTreeTool::new(ctx.clone())));
    registry.add(Arc::new(repo::RepoMapTool::new(ctx.clone())));
    registry.add(Arc::new(files::ReadFileTool::new(ctx.clone())));
    registry.add(Arc::new(files::SearchTool::new(ctx.clone())));
    registry.add(Arc::new(git::GitStatusTool::new(ctx.clone())));
    registry.add(Arc::new(git::ApplyPatchTool::new(ctx.clone())));
    registry.add(Arc::new(shell::ShellTool::new(ctx.clone())));
    registry.add(Arc::new(shell::DiagramTool::new(ctx.clone())));
    registry.add(Arc::new(shell::VerifyTool::new(ctx)));
    registry
}

/// Register the spec-mode tools against a concrete spec path.
pub fn add_spec_tools(registry: &mut ToolRegistry, spec_path: PathBuf) {
    registry.add(Arc::new(spec::ReadSpecTool::new(spec_path.clone())));
    registry.add(Arc::new(spec::WriteSpecTool::new(spec_path.clone())));
    registry.add(Arc::new(spec::ValidateSpecTool::new(spec_path)));
}

/// Parse a tool's JSON input string into its typed request.
///
/// Empty input and the literal `null` read as `{}`. Schema mismatches
/// surface as an error string the registry turns into `ok=false`.
pub(crate) fn parse_input<T: DeserializeOwned>(input: &str) -> Result<T, String> {
    let trimmed = input.trim();
    let effective = if trimmed.is_empty() || trimmed == "null" {
        "{}"
    } else {
        trimmed
    };
    serde_json::from_str(effective).map_err(|e| format!("invalid input: {e}"))
}
