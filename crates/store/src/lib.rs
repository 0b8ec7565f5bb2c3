//! Event-sourced store for runs and sessions.
//!
//! Per aggregate the store keeps a JSON head document (a materialized
//! view) and an append-only `events.ndjson` log (the canonical truth),
//! plus in-memory caches, subscriber fan-out, the approval waiter
//! registry, and the cancellation registry.
//!
//! Layout under the data dir:
//!
//! ```text
//! runs/<run_id>/{run.json, events.ndjson, artifacts/...}
//! sessions/<session_id>/{session.json, events.ndjson,
//!                        attachments/..., artifacts/<turn_id>/...}
//! ```

mod approvals;
mod attachments;
mod cancel;
mod events;
mod export;
mod store;

pub use approvals::{ApprovalAction, Decision};
pub use attachments::AttachmentRef;
pub use store::Store;
