//! File access tools: bounded reads and substring search.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use tether_domain::tool::{ToolCall, ToolDefinition, ToolKind, ToolResult};
use tether_domain::CancelToken;
use tether_workspace::{safe_join, walk};

use crate::{parse_input, Tool, ToolContext};

const MAX_READ_LINES: usize = 800;
const MAX_SEARCH_RESULTS: usize = 200;
const MAX_EXCERPT_CHARS: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadFileRequest {
    path: String,
    /// 1-based inclusive start line; values below 1 clamp to 1.
    #[serde(default)]
    start_line: Option<i64>,
    /// 1-based inclusive end line; values beyond EOF clamp to file length.
    #[serde(default)]
    end_line: Option<i64>,
}

pub struct ReadFileTool {
    ctx: Arc<ToolContext>,
}

impl ReadFileTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Read one file by workspace-relative path, optionally a line range.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "start_line": {"type": "integer"},
                    "end_line": {"type": "integer"}
                },
                "required": ["path"]
            }),
            kind: ToolKind::Read,
            requires_approval: false,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, _cancel: &CancelToken) -> ToolResult {
        let req: ReadFileRequest = match parse_input(&call.input) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(&call.id, e),
        };
        let path = match safe_join(&self.ctx.workspace, &req.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(&call.id, e.to_string()),
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(&call.id, format!("cannot read {}: {e}", req.path)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        if total == 0 {
            return ToolResult::ok(&call.id, "(empty file)");
        }

        let mut start = req.start_line.unwrap_or(1).max(1) as usize;
        let mut end = req.end_line.unwrap_or(total as i64).max(1) as usize;
        end = end.min(total);
        if start > end {
            start = end;
        }
        // Cap the returned range.
        end = end.min(start + MAX_READ_LINES - 1);

        let selected = lines[start - 1..end].join("\n");
        ToolResult::ok(
            &call.id,
            format!("{} (lines {start}-{end} of {total}):\n{selected}", req.path),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    /// Optional filename glob applied to the relative path.
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct SearchTool {
    ctx: Arc<ToolContext>,
}

impl SearchTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for SearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search".into(),
            description: "Substring search across workspace files; returns path:line:excerpt.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "glob": {"type": "string"},
                    "max_results": {"type": "integer"}
                },
                "required": ["query"]
            }),
            kind: ToolKind::Read,
            requires_approval: false,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, cancel: &CancelToken) -> ToolResult {
        let req: SearchRequest = match parse_input(&call.input) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(&call.id, e),
        };
        if req.query.is_empty() {
            return ToolResult::err(&call.id, "invalid input: empty query");
        }
        let pattern = match req.glob.as_deref().map(glob::Pattern::new) {
            Some(Ok(p)) => Some(p),
            Some(Err(e)) => return ToolResult::err(&call.id, format!("invalid input: bad glob: {e}")),
            None => None,
        };
        let cap = req.max_results.unwrap_or(MAX_SEARCH_RESULTS).min(MAX_SEARCH_RESULTS);

        let mut hits = Vec::new();
        'files: for rel in walk::walk(&self.ctx.workspace, 0) {
            if cancel.is_canceled() {
                return ToolResult::err(&call.id, "canceled");
            }
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if let Some(p) = &pattern {
                if !p.matches(&rel_str) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(self.ctx.workspace.join(&rel)) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if line.contains(&req.query) {
                    hits.push(format!(
                        "{rel_str}:{}:{}",
                        idx + 1,
                        excerpt(line.trim(), MAX_EXCERPT_CHARS)
                    ));
                    if hits.len() >= cap {
                        break 'files;
                    }
                }
            }
        }

        if hits.is_empty() {
            return ToolResult::ok(&call.id, "(no matches)");
        }
        ToolResult::ok(&call.id, hits.join("\n"))
    }
}

fn excerpt(line: &str, max: usize) -> String {
    if line.len() <= max {
        return line.to_string();
    }
    let mut end = max;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}
