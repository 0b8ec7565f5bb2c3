//! Interactive session head document: persistent chat history plus turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{self, Prefix};
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    WaitingApproval,
    Completed,
    Failed,
    Canceled,
}

impl SessionStatus {
    /// Whether the session can still accept turns and approvals.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::WaitingApproval | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Chat,
    Spec,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Chat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Running,
    WaitingApproval,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Turn {
    pub fn new() -> Self {
        Self {
            id: id::mint(Prefix::Turn),
            status: TurnStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
        }
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default)]
    pub mode: SessionMode,
    pub workspace_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_path: Option<String>,
    pub messages: Vec<Message>,
    pub turns: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_turn_id: Option<String>,
}

impl Session {
    pub fn new(workspace_path: impl Into<String>, mode: SessionMode) -> Self {
        let now = Utc::now();
        Self {
            id: id::mint(Prefix::Session),
            created_at: now,
            updated_at: now,
            status: SessionStatus::Active,
            mode,
            workspace_path: workspace_path.into(),
            system_prompt: None,
            spec_path: None,
            messages: Vec::new(),
            turns: Vec::new(),
            last_turn_id: None,
        }
    }

    pub fn turn(&self, turn_id: &str) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == turn_id)
    }

    pub fn turn_mut(&mut self, turn_id: &str) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|t| t.id == turn_id)
    }
}
