//! Version-control tools: porcelain status and unified-diff apply.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use tether_domain::tool::{ToolCall, ToolDefinition, ToolKind, ToolResult};
use tether_domain::CancelToken;
use tether_workspace::command::{run_command, CommandError, RunOptions};

use crate::{parse_input, Tool, ToolContext};

const GIT_STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const APPLY_TIMEOUT: Duration = Duration::from_secs(60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// git_status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GitStatusTool {
    ctx: Arc<ToolContext>,
}

impl GitStatusTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for GitStatusTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "git_status".into(),
            description: "Porcelain git status at the workspace root.".into(),
            parameters: json!({"type": "object", "properties": {}}),
            kind: ToolKind::Read,
            requires_approval: false,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, cancel: &CancelToken) -> ToolResult {
        let opts = RunOptions {
            dir: Some(self.ctx.workspace.clone()),
            timeout: GIT_STATUS_TIMEOUT,
            cancel: cancel.clone(),
            ..Default::default()
        };
        match run_command("git status --porcelain", opts).await {
            Ok(out) => {
                if out.stdout.trim().is_empty() {
                    ToolResult::ok(&call.id, "(clean)")
                } else {
                    ToolResult::ok(&call.id, out.stdout)
                }
            }
            Err(e) => ToolResult::err(&call.id, describe_command_error("git status", &e)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// apply_patch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ApplyPatchRequest {
    /// A unified diff, as produced by `git diff`.
    patch: String,
}

pub struct ApplyPatchTool {
    ctx: Arc<ToolContext>,
}

impl ApplyPatchTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ApplyPatchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "apply_patch".into(),
            description: "Apply a unified diff to the workspace via git apply.".into(),
            parameters: json!({
                "type": "object",
                "properties": {"patch": {"type": "string"}},
                "required": ["patch"]
            }),
            kind: ToolKind::Write,
            requires_approval: true,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, cancel: &CancelToken) -> ToolResult {
        let req: ApplyPatchRequest = match parse_input(&call.input) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(&call.id, e),
        };
        if req.patch.trim().is_empty() {
            return ToolResult::err(&call.id, "invalid input: empty patch");
        }

        // git apply reads the diff from a file; stage it outside the
        // workspace so it never shows up in status or the tree walk.
        let mut patch_file = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => return ToolResult::err(&call.id, format!("cannot stage patch: {e}")),
        };
        let mut patch = req.patch;
        if !patch.ends_with('\n') {
            patch.push('\n');
        }
        if let Err(e) = patch_file.write_all(patch.as_bytes()) {
            return ToolResult::err(&call.id, format!("cannot stage patch: {e}"));
        }

        let cmd = format!(
            "git apply --whitespace=nowarn --verbose {}",
            shell_quote(&patch_file.path().to_string_lossy())
        );
        let opts = RunOptions {
            dir: Some(self.ctx.workspace.clone()),
            timeout: APPLY_TIMEOUT,
            cancel: cancel.clone(),
            ..Default::default()
        };
        match run_command(&cmd, opts).await {
            Ok(out) => ToolResult::ok(
                &call.id,
                if out.stderr.trim().is_empty() {
                    "patch applied".to_string()
                } else {
                    format!("patch applied\n{}", out.stderr.trim())
                },
            ),
            Err(e) => {
                let mut diag = String::from("patch failed");
                if let Some(out) = e.output() {
                    if !out.stderr.trim().is_empty() {
                        diag.push('\n');
                        diag.push_str(out.stderr.trim());
                    }
                }
                ToolResult::err(&call.id, diag)
            }
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub(crate) fn describe_command_error(what: &str, err: &CommandError) -> String {
    match err {
        CommandError::TimedOut { timeout_ms, .. } => {
            format!("{what} timed out after {timeout_ms} ms")
        }
        CommandError::Canceled { .. } => format!("{what} canceled"),
        CommandError::ExitStatus { output } => {
            let mut msg = format!("{what} exited with status {}", output.exit_code);
            if !output.stderr.trim().is_empty() {
                msg.push('\n');
                msg.push_str(output.stderr.trim());
            }
            msg
        }
        CommandError::Spawn(e) => format!("{what} failed to start: {e}"),
    }
}
