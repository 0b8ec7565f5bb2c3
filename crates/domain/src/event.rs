//! Append-only event records.
//!
//! The event log is the canonical truth for an aggregate; the head document
//! is a materialized view. Events are never mutated after append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type vocabulary. Kept as plain strings on the wire; these
/// constants are the documented set.
pub mod kind {
    pub const RUN_CREATED: &str = "run_created";
    pub const RUN_STARTED: &str = "run_started";
    pub const RUN_COMPLETED: &str = "run_completed";
    pub const RUN_FAILED: &str = "run_failed";
    pub const RUN_CANCELED: &str = "run_canceled";
    pub const PLAN_GENERATED: &str = "plan_generated";
    pub const STEP_STARTED: &str = "step_started";
    pub const STEP_COMPLETED: &str = "step_completed";
    pub const STEP_FAILED: &str = "step_failed";
    pub const STEP_SKIPPED: &str = "step_skipped";

    pub const SESSION_CREATED: &str = "session_created";
    pub const SESSION_CANCELED: &str = "session_canceled";
    pub const TURN_STARTED: &str = "turn_started";
    pub const TURN_COMPLETED: &str = "turn_completed";
    pub const TURN_FAILED: &str = "turn_failed";
    pub const MODEL_RESOLVED: &str = "model_resolved";
    pub const MODEL_OUTPUT_DELTA: &str = "model_output_delta";
    pub const MODEL_OUTPUT_COMPLETED: &str = "model_output_completed";
    pub const MESSAGE_ADDED: &str = "message_added";
    pub const TOOL_CALL_STARTED: &str = "tool_call_started";
    pub const TOOL_CALL_COMPLETED: &str = "tool_call_completed";
    pub const TOOL_CALL_SKIPPED: &str = "tool_call_skipped";
    pub const APPROVAL_REQUESTED: &str = "approval_requested";
    pub const APPROVAL_GRANTED: &str = "approval_granted";
    pub const APPROVAL_DENIED: &str = "approval_denied";
    pub const SPEC_PATH_SET: &str = "spec_path_set";
    pub const SPEC_CREATED: &str = "spec_created";
    pub const SPEC_VALIDATED: &str = "spec_validated";
}

/// One event line. Exactly one of `run_id`/`session_id` is set once the
/// store has accepted the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            ts: None,
            run_id: None,
            session_id: None,
            turn_id: None,
            kind: kind.into(),
            message: None,
            data: None,
        }
    }

    pub fn with_turn(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Read a data field, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}
