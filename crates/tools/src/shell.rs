//! Exec-class tools: arbitrary shell commands, the diagram build target,
//! and the verification runner.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use tether_domain::tool::{ToolCall, ToolDefinition, ToolKind, ToolResult};
use tether_domain::CancelToken;
use tether_workspace::command::{run_command, CommandError, CommandOutput, RunOptions};

use crate::{parse_input, Tool, ToolContext};

const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DIAGRAM_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

fn render_output(out: &CommandOutput) -> String {
    let mut text = format!("exit {} in {} ms", out.exit_code, out.duration_ms);
    if !out.stdout.trim().is_empty() {
        text.push_str("\nstdout:\n");
        text.push_str(out.stdout.trim_end());
    }
    if !out.stderr.trim().is_empty() {
        text.push_str("\nstderr:\n");
        text.push_str(out.stderr.trim_end());
    }
    text
}

fn result_from_command(call_id: &str, outcome: Result<CommandOutput, CommandError>) -> ToolResult {
    match outcome {
        Ok(out) => ToolResult::ok(call_id, render_output(&out)),
        Err(e) => {
            let mut result = ToolResult::err(call_id, e.to_string());
            if let Some(out) = e.output() {
                result.parts = vec![tether_domain::message::MessagePart::text(render_output(out))];
            }
            result
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// shell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ShellRequest {
    command: String,
    /// Per-call timeout override in milliseconds.
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub struct ShellTool {
    ctx: Arc<ToolContext>,
}

impl ShellTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".into(),
            description: "Run a shell command at the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "timeout_ms": {"type": "integer"}
                },
                "required": ["command"]
            }),
            kind: ToolKind::Exec,
            requires_approval: true,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, cancel: &CancelToken) -> ToolResult {
        let req: ShellRequest = match parse_input(&call.input) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(&call.id, e),
        };
        if req.command.trim().is_empty() {
            return ToolResult::err(&call.id, "invalid input: empty command");
        }
        let opts = RunOptions {
            dir: Some(self.ctx.workspace.clone()),
            timeout: req
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SHELL_TIMEOUT),
            cancel: cancel.clone(),
            ..Default::default()
        };
        result_from_command(&call.id, run_command(&req.command, opts).await)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// diagram
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DiagramTool {
    ctx: Arc<ToolContext>,
}

impl DiagramTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for DiagramTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "diagram".into(),
            description: "Build the project's diagrams (make diagrams).".into(),
            parameters: json!({"type": "object", "properties": {}}),
            kind: ToolKind::Exec,
            requires_approval: true,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, cancel: &CancelToken) -> ToolResult {
        let opts = RunOptions {
            dir: Some(self.ctx.workspace.clone()),
            timeout: DIAGRAM_TIMEOUT,
            cancel: cancel.clone(),
            ..Default::default()
        };
        result_from_command(&call.id, run_command("make diagrams", opts).await)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// verify
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VerifyTool {
    ctx: Arc<ToolContext>,
}

impl VerifyTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for VerifyTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "verify".into(),
            description: "Run the configured verification commands in order.".into(),
            parameters: json!({"type": "object", "properties": {}}),
            kind: ToolKind::Exec,
            requires_approval: false,
            // Auto-verify is injected by the engine at convergence; it must
            // not trip the exec approval gate.
            allow_without_approval: true,
        }
    }

    async fn invoke(&self, call: &ToolCall, cancel: &CancelToken) -> ToolResult {
        if self.ctx.verify_commands.is_empty() {
            return ToolResult::ok(&call.id, "no verify commands configured");
        }

        let mut report = String::new();
        let mut all_ok = true;
        for cmd in &self.ctx.verify_commands {
            if cancel.is_canceled() {
                return ToolResult::err(&call.id, "canceled");
            }
            let opts = RunOptions {
                dir: Some(self.ctx.workspace.clone()),
                timeout: VERIFY_TIMEOUT,
                cancel: cancel.clone(),
                ..Default::default()
            };
            report.push_str(&format!("$ {cmd}\n"));
            match run_command(cmd, opts).await {
                Ok(out) => {
                    report.push_str(&render_output(&out));
                    report.push('\n');
                }
                Err(e) => {
                    all_ok = false;
                    if let Some(out) = e.output() {
                        report.push_str(&render_output(out));
                        report.push('\n');
                    }
                    report.push_str(&format!("verify failed: {e}\n"));
                    break;
                }
            }
        }

        if all_ok {
            ToolResult::ok(&call.id, report)
        } else {
            let mut result = ToolResult::err(&call.id, "verification failed");
            result.parts = vec![tether_domain::message::MessagePart::text(report)];
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(input: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: "x".into(),
            input: input.into(),
        }
    }

    #[tokio::test]
    async fn shell_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let ctx = ToolContext::new(dir.path(), vec![]);
        let r = ShellTool::new(ctx)
            .invoke(&call(r#"{"command":"ls"}"#), &CancelToken::new())
            .await;
        assert!(r.ok);
        assert!(r.text().contains("marker.txt"));
        assert!(r.text().starts_with("exit 0"));
    }

    #[tokio::test]
    async fn shell_failure_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), vec![]);
        let r = ShellTool::new(ctx)
            .invoke(
                &call(r#"{"command":"echo partial; exit 2"}"#),
                &CancelToken::new(),
            )
            .await;
        assert!(!r.ok);
        assert!(r.text().contains("partial"));
        assert!(r.error.unwrap().contains("status 2"));
    }

    #[tokio::test]
    async fn shell_timeout_override() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), vec![]);
        let r = ShellTool::new(ctx)
            .invoke(
                &call(r#"{"command":"sleep 5","timeout_ms":100}"#),
                &CancelToken::new(),
            )
            .await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn verify_runs_all_commands() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(
            dir.path(),
            vec!["echo first".into(), "echo second".into()],
        );
        let r = VerifyTool::new(ctx)
            .invoke(&call("{}"), &CancelToken::new())
            .await;
        assert!(r.ok);
        let text = r.text();
        assert!(text.contains("$ echo first"));
        assert!(text.contains("$ echo second"));
    }

    #[tokio::test]
    async fn verify_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(
            dir.path(),
            vec!["false".into(), "echo never".into()],
        );
        let r = VerifyTool::new(ctx)
            .invoke(&call("{}"), &CancelToken::new())
            .await;
        assert!(!r.ok);
        assert!(!r.text().contains("never"));
        assert_eq!(r.error.as_deref(), Some("verification failed"));
    }

    #[tokio::test]
    async fn verify_with_no_commands_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), vec![]);
        let r = VerifyTool::new(ctx)
            .invoke(&call("{}"), &CancelToken::new())
            .await;
        assert!(r.ok);
    }
}
