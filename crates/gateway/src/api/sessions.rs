//! Session endpoints: create, chat, approve, cancel, attachments,
//! export.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use tether_domain::message::MessagePart;
use tether_domain::session::{Session, SessionMode};
use tether_domain::Error;
use tether_store::{ApprovalAction, AttachmentRef, Decision};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub workspace: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub mode: Option<SessionMode>,
    #[serde(default)]
    pub spec_path: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Json<Session>> {
    let session = state
        .store
        .create_session(
            &req.workspace,
            req.system_prompt,
            req.mode.unwrap_or(SessionMode::Chat),
            req.spec_path,
        )
        .await?;
    Ok(Json(session))
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.store.list_sessions())
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.store.get_session(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    /// Attachment refs previously returned by the upload endpoint.
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct MessageAttachment {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Append a user message and start a turn. Returns the turn id.
pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut parts = Vec::new();
    if let Some(text) = req.text.filter(|t| !t.trim().is_empty()) {
        parts.push(MessagePart::text(text));
    }
    for att in req.attachments {
        let is_image = att
            .mime_type
            .as_deref()
            .map(|m| m.starts_with("image/"))
            .unwrap_or(false);
        if is_image {
            parts.push(MessagePart::Image {
                reference: att.reference,
                mime_type: att.mime_type,
            });
        } else {
            parts.push(MessagePart::File {
                reference: att.reference,
                mime_type: att.mime_type,
            });
        }
    }
    if parts.is_empty() {
        return Err(Error::InvalidInput("message is empty".into()).into());
    }

    let turn_id = state.sessions.post_message(&id, parts).await?;
    Ok(Json(json!({ "turn_id": turn_id })))
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub action: ApprovalAction,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    Path((id, call_id)): Path<(String, String)>,
    Json(req): Json<ApprovalRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.approve(
        &id,
        &call_id,
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
    state.store.cancel_session(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// File content, standard base64.
    pub data_base64: String,
}

pub async fn upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UploadRequest>,
) -> ApiResult<Json<AttachmentRef>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.data_base64.trim())
        .map_err(|e| Error::InvalidInput(format!("bad base64 payload: {e}")))?;
    let saved = state
        .store
        .save_session_attachment(&id, &req.filename, req.mime_type.as_deref(), &bytes)
        .await?;
    Ok(Json(saved))
}

pub async fn export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.store.export_session(&id)?;
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
