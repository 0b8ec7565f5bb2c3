//! Approval waiters: one-shot rendezvous between an executor blocked on
//! a sensitive tool call and the human who resolves it.
//!
//! A waiter is keyed by `(parent_id, call_id)`. Registering twice for
//! the same key is an invariant violation surfaced as `Conflict`.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use tether_domain::{CancelToken, Error, Result};

use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approve,
    Deny,
}

/// The decision made by a human reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: ApprovalAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn approve() -> Self {
        Self {
            action: ApprovalAction::Approve,
            reason: None,
        }
    }

    pub fn deny(reason: Option<String>) -> Self {
        Self {
            action: ApprovalAction::Deny,
            reason,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.action == ApprovalAction::Approve
    }
}

type Key = (String, String);

#[derive(Default)]
pub(crate) struct ApprovalRegistry {
    senders: Mutex<HashMap<Key, oneshot::Sender<Decision>>>,
    receivers: Mutex<HashMap<Key, oneshot::Receiver<Decision>>>,
}

impl Store {
    /// Register a one-shot waiter for `(parent_id, call_id)`.
    pub fn require_approval(&self, parent_id: &str, call_id: &str) -> Result<()> {
        let key = (parent_id.to_string(), call_id.to_string());
        let mut senders = self.approvals.senders.lock();
        if senders.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "approval waiter already registered for {call_id}"
            )));
        }
        let (tx, rx) = oneshot::channel();
        senders.insert(key.clone(), tx);
        self.approvals.receivers.lock().insert(key, rx);
        Ok(())
    }

    /// Resolve a pending approval. `NotFound` when no waiter exists.
    pub fn approve(&self, parent_id: &str, call_id: &str, decision: Decision) -> Result<()> {
        let key = (parent_id.to_string(), call_id.to_string());
        let sender = self
            .approvals
            .senders
            .lock()
            .remove(&key)
            .ok_or_else(|| Error::NotFound(format!("no pending approval for {call_id}")))?;
        // The waiter may have been torn down by cancellation already.
        let _ = sender.send(decision);
        Ok(())
    }

    /// Block until the approval is resolved or the token is canceled.
    pub async fn wait_for_approval(
        &self,
        parent_id: &str,
        call_id: &str,
        cancel: &CancelToken,
    ) -> Result<Decision> {
        let key = (parent_id.to_string(), call_id.to_string());
        let rx = self
            .approvals
            .receivers
            .lock()
            .remove(&key)
            .ok_or_else(|| Error::NotFound(format!("no pending approval for {call_id}")))?;

        tokio::select! {
            decision = rx => match decision {
                Ok(d) => Ok(d),
                // Sender dropped without a decision: the aggregate is
                // being torn down.
                Err(_) => Err(Error::Canceled),
            },
            _ = cancel.cancelled() => {
                self.approvals.senders.lock().remove(&key);
                Err(Error::Canceled)
            }
        }
    }

    /// Drop any waiters for an aggregate (cancellation teardown).
    pub(crate) fn drop_approvals_for(&self, parent_id: &str) {
        self.approvals
            .senders
            .lock()
            .retain(|(pid, _), _| pid != parent_id);
        self.approvals
            .receivers
            .lock()
            .retain(|(pid, _), _| pid != parent_id);
    }
}
