//! Cancellation registry: one token per live aggregate executor.

use std::collections::HashMap;

use parking_lot::Mutex;

use tether_domain::event::{kind, Event};
use tether_domain::session::SessionStatus;
use tether_domain::{CancelToken, Result};

use crate::store::Store;

#[derive(Default)]
pub(crate) struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Store {
    /// Install the cancellation handle for a live executor. Replaces any
    /// previous handle for the aggregate.
    pub fn set_cancel(&self, parent_id: &str, token: CancelToken) {
        self.cancels
            .tokens
            .lock()
            .insert(parent_id.to_string(), token);
    }

    /// Remove the handle when an executor finishes.
    pub fn clear_cancel(&self, parent_id: &str) {
        self.cancels.tokens.lock().remove(parent_id);
    }

    pub fn is_cancel_registered(&self, parent_id: &str) -> bool {
        self.cancels.tokens.lock().contains_key(parent_id)
    }

    fn trigger(&self, parent_id: &str) -> bool {
        if let Some(token) = self.cancels.tokens.lock().get(parent_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Cancel a run. The executor observes the token at its next
    /// checkpoint and transitions the head itself.
    pub async fn cancel_run(&self, run_id: &str) -> Result<()> {
        self.get_run(run_id)?;
        let triggered = self.trigger(run_id);
        self.drop_approvals_for(run_id);
        tracing::info!(run_id, triggered, "run cancellation requested");
        Ok(())
    }

    /// Cancel a session: trigger the live executor (if any) and flip the
    /// head to `canceled` when it is still active or waiting.
    pub async fn cancel_session(&self, session_id: &str) -> Result<()> {
        let session = self.get_session(session_id)?;
        let triggered = self.trigger(session_id);

        if matches!(
            session.status,
            SessionStatus::Active | SessionStatus::WaitingApproval
        ) {
            self.update_session(session_id, |s| s.status = SessionStatus::Canceled)
                .await?;
            self.append_event(session_id, Event::new(kind::SESSION_CANCELED))
                .await?;
        }
        self.drop_approvals_for(session_id);
        tracing::info!(session_id, triggered, "session cancellation requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_domain::session::SessionMode;

    #[tokio::test]
    async fn cancel_session_flips_head_and_triggers_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let session = store
            .create_session("/w", None, SessionMode::Chat, None)
            .await
            .unwrap();

        let token = CancelToken::new();
        store.set_cancel(&session.id, token.clone());

        store.cancel_session(&session.id).await.unwrap();
        assert!(token.is_canceled());
        let head = store.get_session(&session.id).unwrap();
        assert_eq!(head.status, SessionStatus::Canceled);

        let events = store.read_events(&session.id, 0).unwrap();
        assert_eq!(events.last().unwrap().kind, kind::SESSION_CANCELED);
    }

    #[tokio::test]
    async fn cancel_session_twice_appends_one_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let session = store
            .create_session("/w", None, SessionMode::Chat, None)
            .await
            .unwrap();

        store.cancel_session(&session.id).await.unwrap();
        store.cancel_session(&session.id).await.unwrap();

        let canceled_events = store
            .read_events(&session.id, 0)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == kind::SESSION_CANCELED)
            .count();
        assert_eq!(canceled_events, 1);
    }

    #[tokio::test]
    async fn cancel_run_triggers_token_without_head_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let run = store.create_run("/w", "/w/spec.md").await.unwrap();

        let token = CancelToken::new();
        store.set_cancel(&run.id, token.clone());
        store.cancel_run(&run.id).await.unwrap();

        assert!(token.is_canceled());
        // Head transition is the executor's job.
        assert_eq!(
            store.get_run(&run.id).unwrap().status,
            tether_domain::run::RunStatus::Queued
        );
    }

    #[tokio::test]
    async fn clear_cancel_removes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let run = store.create_run("/w", "/w/spec.md").await.unwrap();

        store.set_cancel(&run.id, CancelToken::new());
        assert!(store.is_cancel_registered(&run.id));
        store.clear_cancel(&run.id);
        assert!(!store.is_cancel_registered(&run.id));
    }
}
