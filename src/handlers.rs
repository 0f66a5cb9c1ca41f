//! HTTP route handlers for the web application.
//!
//! JSON endpoints the UI uses to read state and dispatch intents. Every
//! failure comes back as `{"error": "..."}` with a matching status code.

use crate::capture::CaptureError;
use crate::messaging::MessageError;
use crate::models::{ExtensionMessage, Note, NoteDraft, NoteEdit, SenderInfo, Settings};
use crate::state::{Action, Outcome, StateError, StatusSnapshot};
use crate::summarize::{summarize_recent, SummarizeError};
use crate::sync::{sync_note, SyncError};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Errors
// ============================================================================

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        let status = match e {
            StateError::UnknownNote(_) => StatusCode::NOT_FOUND,
            StateError::NothingPending => StatusCode::CONFLICT,
        };
        ApiError(status, e.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        let status = match e {
            SyncError::NotConfigured { .. } => StatusCode::PRECONDITION_FAILED,
            SyncError::UnknownNote(_) => StatusCode::NOT_FOUND,
            SyncError::AlreadySyncing => StatusCode::CONFLICT,
            SyncError::InvalidEndpoint(_) => StatusCode::BAD_REQUEST,
            SyncError::Http(_) | SyncError::Rejected(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError(status, e.to_string())
    }
}

impl From<SummarizeError> for ApiError {
    fn from(e: SummarizeError) -> Self {
        let status = match e {
            SummarizeError::NothingToSummarize => StatusCode::BAD_REQUEST,
            SummarizeError::Busy => StatusCode::CONFLICT,
            SummarizeError::AuthorizationFailed(_) => StatusCode::UNAUTHORIZED,
            SummarizeError::Http(_)
            | SummarizeError::Status { .. }
            | SummarizeError::EmptyResponse => StatusCode::BAD_GATEWAY,
        };
        ApiError(status, e.to_string())
    }
}

impl From<CaptureError> for ApiError {
    fn from(e: CaptureError) -> Self {
        let status = match e {
            CaptureError::NoOverlay => StatusCode::BAD_REQUEST,
            CaptureError::Message(_) => StatusCode::SERVICE_UNAVAILABLE,
            CaptureError::Rejected => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

// ============================================================================
// Notes
// ============================================================================

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

pub async fn list_notes(
    Query(query): Query<SearchQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<Vec<Note>> {
    let q = query.q.unwrap_or_default();
    Json(state.container.search(&q))
}

pub async fn create_note(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<NoteDraft>,
) -> Result<(StatusCode, Json<Note>), ApiError> {
    match state.container.dispatch(Action::CreateNote(draft))? {
        Outcome::Created(note) => Ok((StatusCode::CREATED, Json(note))),
        other => Err(unexpected(other)),
    }
}

pub async fn edit_note(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(edit): Json<NoteEdit>,
) -> Result<Json<Note>, ApiError> {
    match state.container.dispatch(Action::EditNote { id, edit })? {
        Outcome::Edited(note) => Ok(Json(note)),
        other => Err(unexpected(other)),
    }
}

// ============================================================================
// Delete (two-step)
// ============================================================================

pub async fn request_delete(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    state.container.dispatch(Action::RequestDelete(id.clone()))?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "pending": id }))).into_response())
}

pub async fn confirm_delete(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    match state.container.dispatch(Action::ConfirmDelete)? {
        Outcome::Deleted(id) => Ok(Json(json!({ "deleted": id })).into_response()),
        other => Err(unexpected(other)),
    }
}

pub async fn cancel_delete(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.container.dispatch(Action::CancelDelete)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Integrations
// ============================================================================

pub async fn sync_to_notion(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    sync_note(&state.container, &state.sync, &id).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

pub async fn summarize(State(state): State<Arc<AppState>>) -> Result<Json<Note>, ApiError> {
    let note = summarize_recent(&state.container, &state.ai, &state.credentials, &state.model).await?;
    Ok(Json(note))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectKeyRequest {
    pub api_key: String,
}

pub async fn connect_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConnectKeyRequest>,
) -> Result<StatusCode, ApiError> {
    if body.api_key.trim().is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "API key is required".to_string()));
    }
    state.credentials.connect(&body.api_key);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Settings
// ============================================================================

pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(state.container.settings())
}

pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    state.container.dispatch(Action::ReplaceSettings(settings))?;
    Ok(Json(state.container.settings()))
}

// ============================================================================
// Capture
// ============================================================================

/// Body posted by the page widget: the message plus the page it came from.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureBody {
    pub action: String,
    pub content: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub fav_icon_url: Option<String>,
}

pub async fn capture(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CaptureBody>,
) -> Result<Response, ApiError> {
    if body.action != "SAVE_NOTE" {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("Unknown action '{}'", body.action),
        ));
    }
    let message = ExtensionMessage::SaveNote {
        content: body.content,
        title: body.title,
    };
    let sender = SenderInfo {
        url: body.url,
        fav_icon_url: body.fav_icon_url,
    };
    let ack = state
        .capture
        .send(message, sender)
        .await
        .map_err(|e: MessageError| ApiError::from(CaptureError::from(e)))?;
    Ok(Json(ack).into_response())
}

// ============================================================================
// Status
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub state: StatusSnapshot,
    pub ai_connected: bool,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.container.status(),
        ai_connected: state.credentials.is_connected(),
    })
}

fn unexpected(outcome: Outcome) -> ApiError {
    ApiError(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Unexpected outcome: {:?}", outcome),
    )
}
