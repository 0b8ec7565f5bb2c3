//! Run endpoints: create/start, inspect, approve, cancel, export.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use tether_domain::run::Run;
use tether_store::{ApprovalAction, Decision};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub workspace: String,
    pub spec_path: String,
}

/// Create a run and start its background worker.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateRunRequest>,
) -> ApiResult<Json<Run>> {
    let run = state
        .store
        .create_run(&req.workspace, &req.spec_path)
        .await?;
    state.runs.start_run(&run.id)?;
    Ok(Json(state.store.get_run(&run.id)?))
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<Run>> {
    Json(state.store.list_runs())
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Run>> {
    Ok(Json(state.store.get_run(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub action: ApprovalAction,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(req): Json<ApprovalRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.approve(
        &id,
        &step_id,
        Decision {
            action: req.action,
            reason: req.reason,
        },
    )?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.cancel_run(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.store.export_run(&id)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.zip\""),
            ),
        ],
        bytes,
    ))
}
