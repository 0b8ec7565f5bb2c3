//! Spec-mode tools: read, write, and validate the session's spec file.
//!
//! The spec is a markdown document whose required skeleton is a goal
//! heading, a constraints heading, and an acceptance heading. Validation
//! is heading-presence only; prose is the model's business.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::json;

use tether_domain::tool::{ToolCall, ToolDefinition, ToolKind, ToolResult};
use tether_domain::CancelToken;

use crate::{parse_input, Tool};

/// Template written when a spec-mode session starts without a spec file.
pub const SPEC_TEMPLATE: &str = "# Goal\n\nDescribe what this work should achieve.\n\n# Constraints\n\nList the constraints the implementation must respect.\n\n# Acceptance Criteria\n\nList the checks that prove the goal is met.\n";

/// Validate spec content. Returns the ordered list of problems; empty
/// means the spec passes.
pub fn validate_spec_content(content: &str) -> Vec<String> {
    let headings: Vec<String> = content
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            if !trimmed.starts_with('#') {
                return None;
            }
            Some(
                trimmed
                    .trim_start_matches('#')
                    .trim()
                    .to_ascii_lowercase(),
            )
        })
        .collect();

    let mut problems = Vec::new();
    if !headings.iter().any(|h| h.starts_with("goal")) {
        problems.push("missing heading: # Goal".to_string());
    }
    if !headings.iter().any(|h| h.contains("constraint")) {
        problems.push("missing heading: # Constraints".to_string());
    }
    if !headings.iter().any(|h| h.contains("acceptance")) {
        problems.push("missing heading: # Acceptance Criteria".to_string());
    }
    problems
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_spec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReadSpecTool {
    spec_path: PathBuf,
}

impl ReadSpecTool {
    pub fn new(spec_path: PathBuf) -> Self {
        Self { spec_path }
    }
}

#[async_trait::async_trait]
impl Tool for ReadSpecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_spec".into(),
            description: "Read the current spec document.".into(),
            parameters: json!({"type": "object", "properties": {}}),
            kind: ToolKind::Read,
            requires_approval: false,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, _cancel: &CancelToken) -> ToolResult {
        match std::fs::read_to_string(&self.spec_path) {
            Ok(content) if content.trim().is_empty() => {
                ToolResult::ok(&call.id, "(spec is empty)")
            }
            Ok(content) => ToolResult::ok(&call.id, content),
            Err(e) => ToolResult::err(
                &call.id,
                format!("cannot read spec {}: {e}", self.spec_path.display()),
            ),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_spec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteSpecRequest {
    content: String,
}

pub struct WriteSpecTool {
    spec_path: PathBuf,
}

impl WriteSpecTool {
    pub fn new(spec_path: PathBuf) -> Self {
        Self { spec_path }
    }
}

#[async_trait::async_trait]
impl Tool for WriteSpecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_spec".into(),
            description: "Replace the spec document with new content.".into(),
            parameters: json!({
                "type": "object",
                "properties": {"content": {"type": "string"}},
                "required": ["content"]
            }),
            kind: ToolKind::Write,
            requires_approval: false,
            // The spec is the session's primary artifact in spec mode;
            // gating every revision on a human defeats the loop.
            allow_without_approval: true,
        }
    }

    async fn invoke(&self, call: &ToolCall, _cancel: &CancelToken) -> ToolResult {
        let req: WriteSpecRequest = match parse_input(&call.input) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(&call.id, e),
        };
        if let Some(parent) = self.spec_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::err(&call.id, format!("cannot create spec dir: {e}"));
            }
        }
        match std::fs::write(&self.spec_path, req.content) {
            Ok(()) => ToolResult::ok(&call.id, "spec written"),
            Err(e) => ToolResult::err(
                &call.id,
                format!("cannot write spec {}: {e}", self.spec_path.display()),
            ),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// validate_spec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ValidateSpecTool {
    spec_path: PathBuf,
}

impl ValidateSpecTool {
    pub fn new(spec_path: PathBuf) -> Self {
        Self { spec_path }
    }
}

#[async_trait::async_trait]
impl Tool for ValidateSpecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "validate_spec".into(),
            description: "Check the spec for the required headings.".into(),
            parameters: json!({"type": "object", "properties": {}}),
            kind: ToolKind::Read,
            requires_approval: false,
            allow_without_approval: false,
        }
    }

    async fn invoke(&self, call: &ToolCall, _cancel: &CancelToken) -> ToolResult {
        let content = match std::fs::read_to_string(&self.spec_path) {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::err(
                    &call.id,
                    format!("cannot read spec {}: {e}", self.spec_path.display()),
                )
            }
        };
        let problems = validate_spec_content(&content);
        if problems.is_empty() {
            ToolResult::ok(&call.id, "spec is valid")
        } else {
            ToolResult::err(&call.id, problems.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_passes_validation() {
        assert!(validate_spec_content(SPEC_TEMPLATE).is_empty());
    }

    #[test]
    fn reports_all_missing_headings_in_order() {
        let problems = validate_spec_content("just prose\n");
        assert_eq!(
            problems,
            vec![
                "missing heading: # Goal",
                "missing heading: # Constraints",
                "missing heading: # Acceptance Criteria",
            ]
        );
    }

    #[test]
    fn headings_match_loosely() {
        let content = "## Goals\n\n### Design constraints\n\n# Acceptance criteria\n";
        assert!(validate_spec_content(content).is_empty());
    }

    #[test]
    fn heading_order_does_not_matter() {
        let content = "# Acceptance Criteria\n# Constraints\n# Goal\n";
        assert!(validate_spec_content(content).is_empty());
    }

    #[test]
    fn case_insensitive() {
        let content = "# GOAL\n# CONSTRAINTS\n# ACCEPTANCE CRITERIA\n";
        assert!(validate_spec_content(content).is_empty());
    }

    #[test]
    fn partial_spec_reports_the_gap() {
        let content = "# Goal\nship it\n# Constraints\nnone\n";
        assert_eq!(
            validate_spec_content(content),
            vec!["missing heading: # Acceptance Criteria"]
        );
    }

    fn spec_fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("specs/spec.md");
        (dir, spec_path)
    }

    fn call(input: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: "x".into(),
            input: input.into(),
        }
    }

    #[tokio::test]
    async fn write_then_read_then_validate() {
        let (_dir, spec_path) = spec_fixture();

        let w = WriteSpecTool::new(spec_path.clone());
        let input = serde_json::json!({ "content": SPEC_TEMPLATE }).to_string();
        let r = w.invoke(&call(&input), &CancelToken::new()).await;
        assert!(r.ok);
        assert_eq!(r.text(), "spec written");

        let rd = ReadSpecTool::new(spec_path.clone());
        let r = rd.invoke(&call("{}"), &CancelToken::new()).await;
        assert!(r.text().contains("# Goal"));

        let v = ValidateSpecTool::new(spec_path);
        let r = v.invoke(&call("{}"), &CancelToken::new()).await;
        assert!(r.ok);
    }

    #[tokio::test]
    async fn validate_missing_goal() {
        let (_dir, spec_path) = spec_fixture();
        std::fs::create_dir_all(spec_path.parent().unwrap()).unwrap();
        std::fs::write(&spec_path, "# Constraints\n# Acceptance Criteria\n").unwrap();

        let v = ValidateSpecTool::new(spec_path);
        let r = v.invoke(&call("{}"), &CancelToken::new()).await;
        assert!(!r.ok);
        assert_eq!(r.error.as_deref(), Some("missing heading: # Goal"));
    }

    #[tokio::test]
    async fn read_missing_spec_is_an_error() {
        let (_dir, spec_path) = spec_fixture();
        let rd = ReadSpecTool::new(spec_path);
        let r = rd.invoke(&call("{}"), &CancelToken::new()).await;
        assert!(!r.ok);
    }
}
