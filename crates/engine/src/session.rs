//! The session executor: at most one live turn per session, with
//! background workers that never propagate errors to the caller.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use tether_domain::config::{ApprovalPolicy, ModelPolicy, VerifyPolicy};
use tether_domain::event::{kind, Event};
use tether_domain::message::{Message, MessagePart, Role};
use tether_domain::session::{SessionStatus, TurnStatus};
use tether_domain::{CancelToken, Error, Result};
use tether_providers::ProviderKit;
use tether_store::Store;

use crate::turn::TurnRunner;

pub struct SessionExecutor {
    store: Arc<Store>,
    kit: Arc<ProviderKit>,
    model_policy: ModelPolicy,
    verify_policy: VerifyPolicy,
    approval_policy: ApprovalPolicy,
    /// Session ids with a live turn worker.
    live: Mutex<HashSet<String>>,
}

impl SessionExecutor {
    pub fn new(
        store: Arc<Store>,
        kit: Arc<ProviderKit>,
        model_policy: ModelPolicy,
        verify_policy: VerifyPolicy,
        approval_policy: ApprovalPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            kit,
            model_policy,
            verify_policy,
            approval_policy,
            live: Mutex::new(HashSet::new()),
        })
    }

    /// Append a user message, open a turn, and start it. Returns the
    /// turn id.
    pub async fn post_message(
        self: &Arc<Self>,
        session_id: &str,
        parts: Vec<MessagePart>,
    ) -> Result<String> {
        let session = self.store.get_session(session_id)?;
        if !session.status.is_open() {
            return Err(Error::Conflict(format!(
                "session {session_id} is closed"
            )));
        }
        if parts.is_empty() {
            return Err(Error::InvalidInput("message has no parts".into()));
        }
        if self.live.lock().contains(session_id) {
            return Err(Error::Conflict(format!(
                "session {session_id} already has a running turn"
            )));
        }

        let message = Message::new(Role::User, parts);
        let message_id = message.id.clone();
        self.store.append_message(session_id, message).await?;
        self.store
            .append_event(
                session_id,
                Event::new(kind::MESSAGE_ADDED)
                    .with_data("role", json!("user"))
                    .with_data("message_id", json!(message_id)),
            )
            .await?;

        let turn_id = self.store.add_turn(session_id).await?;
        self.start_turn(session_id, &turn_id)?;
        Ok(turn_id)
    }

    /// Start a turn in the background. Fails fast when the session
    /// already has a live turn.
    pub fn start_turn(self: &Arc<Self>, session_id: &str, turn_id: &str) -> Result<()> {
        let session = self.store.get_session(session_id)?;
        if session.turn(turn_id).is_none() {
            return Err(Error::NotFound(format!("turn {turn_id}")));
        }

        {
            let mut live = self.live.lock();
            if !live.insert(session_id.to_string()) {
                return Err(Error::Conflict(format!(
                    "session {session_id} already has a running turn"
                )));
            }
        }

        let cancel = CancelToken::new();
        self.store.set_cancel(session_id, cancel.clone());

        let executor = self.clone();
        let session_id = session_id.to_string();
        let turn_id = turn_id.to_string();
        tokio::spawn(async move {
            let runner = TurnRunner {
                store: executor.store.clone(),
                kit: executor.kit.clone(),
                model_policy: executor.model_policy.clone(),
                verify_policy: executor.verify_policy.clone(),
                approval_policy: executor.approval_policy.clone(),
                session_id: session_id.clone(),
                turn_id: turn_id.clone(),
                cancel,
            };

            if let Err(error) = runner.run().await {
                executor.record_failure(&session_id, &turn_id, error).await;
            }

            executor.live.lock().remove(&session_id);
            executor.store.clear_cancel(&session_id);
        });

        Ok(())
    }

    /// A background turn failure is terminal for the turn, never a
    /// panic of the caller. Cancellation leaves the session `canceled`
    /// without a `turn_failed` event; everything else marks the session
    /// `failed` and announces the failure.
    async fn record_failure(&self, session_id: &str, turn_id: &str, error: Error) {
        let canceled = matches!(error, Error::Canceled);
        let message = if canceled {
            "canceled".to_string()
        } else {
            error.to_string()
        };
        tracing::warn!(session_id, turn_id, error = %message, canceled, "turn ended abnormally");

        let turn_error = message.clone();
        let turn_key = turn_id.to_string();
        let update = self
            .store
            .update_session(session_id, move |s| {
                if let Some(t) = s.turn_mut(&turn_key) {
                    t.status = TurnStatus::Failed;
                    t.error = Some(turn_error);
                    t.ended_at = Some(Utc::now());
                }
                if canceled {
                    s.status = SessionStatus::Canceled;
                } else {
                    s.status = SessionStatus::Failed;
                }
            })
            .await;
        if let Err(e) = update {
            tracing::warn!(session_id, error = %e, "failed to persist turn failure");
        }

        if !canceled {
            let append = self
                .store
                .append_event(
                    session_id,
                    Event::new(kind::TURN_FAILED)
                        .with_turn(turn_id)
                        .with_message(message),
                )
                .await;
            if let Err(e) = append {
                tracing::warn!(session_id, error = %e, "failed to append turn_failed event");
            }
        }
    }
}
