//! Batch run head document: a spec-driven, plan-then-execute unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{self, Prefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    WaitingApproval,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Command,
    Patch,
    Diagram,
    Note,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    WaitingApproval,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub needs_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(title: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id::mint(Prefix::Step),
            title: title.into(),
            kind,
            needs_approval: false,
            command: None,
            patch: None,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn command(title: impl Into<String>, command: impl Into<String>) -> Self {
        let mut step = Self::new(title, StepKind::Command);
        step.command = Some(command.into());
        step
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub workspace_path: String,
    pub spec_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    pub fn new(workspace_path: impl Into<String>, spec_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id::mint(Prefix::Run),
            created_at: now,
            updated_at: now,
            status: RunStatus::Queued,
            workspace_path: workspace_path.into(),
            spec_path: spec_path.into(),
            model: None,
            steps: Vec::new(),
            error: None,
        }
    }
}
