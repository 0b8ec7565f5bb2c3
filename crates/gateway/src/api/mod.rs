//! HTTP + SSE transport over the core.

pub mod events;
pub mod runs;
pub mod sessions;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        // Runs
        .route("/v1/runs", post(runs::create).get(runs::list))
        .route("/v1/runs/:id", get(runs::get_one))
        .route("/v1/runs/:id/events", get(events::run_events))
        .route("/v1/runs/:id/export", get(runs::export))
        .route("/v1/runs/:id/approvals/:step_id", post(runs::approve))
        .route("/v1/runs/:id/cancel", post(runs::cancel))
        // Sessions
        .route("/v1/sessions", post(sessions::create).get(sessions::list))
        .route("/v1/sessions/:id", get(sessions::get_one))
        .route("/v1/sessions/:id/messages", post(sessions::post_message))
        .route(
            "/v1/sessions/:id/approvals/:call_id",
            post(sessions::approve),
        )
        .route("/v1/sessions/:id/cancel", post(sessions::cancel))
        .route("/v1/sessions/:id/attachments", post(sessions::upload))
        .route("/v1/sessions/:id/events", get(events::session_events))
        .route("/v1/sessions/:id/export", get(sessions::export))
        .with_state(state)
}
