//! Cooperative cancellation token.
//!
//! Executors check the token at their checkpoints (loop iterations, model
//! chunks, tool invocation starts); long waits race `cancelled()` so a
//! cancel request wakes them immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A clonable cancellation token. All clones share the same state.
#[derive(Clone, Default, Debug)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default, Debug)]
struct Inner {
    canceled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake all waiters.
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Check whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Wait until the token is canceled.
    pub async fn cancelled(&self) {
        while !self.is_canceled() {
            let notified = self.inner.notify.notified();
            if self.is_canceled() {
                break;
            }
            notified.await;
        }
    }
}
