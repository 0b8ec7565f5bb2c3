//! Workspace orientation tools: file tree and symbol map.

use std::sync::Arc;

use serde_json::json;

use tether_context::symbols;
use tether_domain::tool::{ToolCall, ToolDefinition, ToolKind, ToolResult};
use tether_domain::CancelToken;
use tether_workspace::walk;

use crate::{Tool, ToolContext};

const MAX_TREE_ENTRIES: usize = 500;
const MAX_SYMBOLS: usize = 400;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// repo_tree
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RepoTreeTool {
    ctx: Arc<ToolContext>,
}

impl RepoTreeTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for RepoTreeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "repo_tree".into(),
            description: "List workspace files (bounded, skipping build outputs and repo metadata).".into(),
            parameters: json!({"type": "object", "properties": {}}),
            kind: ToolKind::Read,
            requires_approval: false,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, _cancel: &CancelToken) -> ToolResult {
        let files = walk::walk(&self.ctx.workspace, MAX_TREE_ENTRIES);
        if files.is_empty() {
            return ToolResult::ok(&call.id, "(empty workspace)");
        }
        let listing: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect();
        ToolResult::ok(&call.id, listing.join("\n"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// repo_map
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RepoMapTool {
    ctx: Arc<ToolContext>,
}

impl RepoMapTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for RepoMapTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "repo_map".into(),
            description: "Map top-level symbols (functions, types, bindings) per file.".into(),
            parameters: json!({"type": "object", "properties": {}}),
            kind: ToolKind::Read,
            requires_approval: false,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, _cancel: &CancelToken) -> ToolResult {
        let files = walk::walk(&self.ctx.workspace, MAX_TREE_ENTRIES);
        let mut found = Vec::new();
        for rel in &files {
            if found.len() >= MAX_SYMBOLS {
                break;
            }
            let Some(ext) = rel.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !symbols::MAP_EXTENSIONS.contains(&ext) {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(self.ctx.workspace.join(rel)) {
                found.extend(symbols::extract_from(rel, &content));
            }
        }
        found.truncate(MAX_SYMBOLS);

        if found.is_empty() {
            return ToolResult::ok(&call.id, "(no symbols found)");
        }

        // Group by file: the walk is sorted, extraction is line-ordered.
        let mut out = String::new();
        let mut current_file = "";
        for sym in &found {
            if sym.file != current_file {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&sym.file);
                out.push_str(":\n");
                current_file = &sym.file;
            }
            out.push_str(&format!("  {} {}\n", sym.line, sym.name));
        }
        ToolResult::ok(&call.id, out)
    }
}
