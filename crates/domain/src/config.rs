//! Policy structs consumed by the executors.
//!
//! These deserialize from the daemon config file; every field has a serde
//! default so partial config sections work.

use serde::{Deserialize, Serialize};

use crate::tool::ToolKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Constraints and preferences for model resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPolicy {
    /// Only consider models that support tool calls.
    #[serde(default = "d_true")]
    pub require_tools: bool,
    /// Only consider models that accept image input.
    #[serde(default)]
    pub require_vision: bool,
    /// Upper bound on cost per million tokens, when set.
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    /// Model ids tried in order before falling back to the cheapest match.
    #[serde(default)]
    pub preferred_models: Vec<String>,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            require_tools: true,
            require_vision: false,
            max_cost_usd: None,
            preferred_models: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verify policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls auto-verify injection at turn convergence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPolicy {
    #[serde(default = "d_true")]
    pub auto_verify: bool,
    /// Commands run sequentially by the `verify` tool.
    #[serde(default = "d_verify_commands")]
    pub commands: Vec<String>,
    /// When set, a turn cannot complete while verification fails.
    #[serde(default)]
    pub require_clean: bool,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            auto_verify: true,
            commands: d_verify_commands(),
            require_clean: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Names tool kinds and tool names whose calls require a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    #[serde(default = "d_approval_kinds")]
    pub require_for_kinds: Vec<ToolKind>,
    #[serde(default)]
    pub require_for_tools: Vec<String>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            require_for_kinds: d_approval_kinds(),
            require_for_tools: Vec::new(),
        }
    }
}

impl ApprovalPolicy {
    /// Whether the policy itself names this kind or tool name.
    pub fn names(&self, kind: ToolKind, name: &str) -> bool {
        self.require_for_kinds.contains(&kind)
            || self.require_for_tools.iter().any(|t| t == name)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}

fn d_verify_commands() -> Vec<String> {
    vec!["make test".to_string()]
}

fn d_approval_kinds() -> Vec<ToolKind> {
    vec![ToolKind::Exec, ToolKind::Write]
}
