//! Conversation endpoints: create, list, fetch, download.

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use chatrelay_models::{Conversation, ConversationSummary};

use crate::api::chat::ApiError;
use crate::api::{ApiResponse, state::AppState};

/// Listing returns conversations created within this trailing window.
const LIST_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Deserialize)]
pub struct CreateConversationBody {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedConversation {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: String,
}

fn require_user_id(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error_with_code(
                "MISSING_FIELD",
                "user_id is required",
            )),
        ));
    }
    Ok(())
}

fn internal_error(error: anyhow::Error) -> ApiError {
    // Detail stays in the log; the caller gets a masked message.
    tracing::error!(%error, "Conversation request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("Something went wrong")),
    )
}

fn not_found(session_id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(format!(
            "Conversation '{session_id}' not found"
        ))),
    )
}

// POST /api/conversations
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(body): Json<CreateConversationBody>,
) -> Result<Json<ApiResponse<CreatedConversation>>, ApiError> {
    require_user_id(&body.user_id)?;

    let session_id = state
        .orchestrator
        .new_conversation(&body.user_id)
        .map_err(internal_error)?;
    Ok(Json(ApiResponse::ok(CreatedConversation { session_id })))
}

// GET /api/conversations?user_id=...
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ApiResponse<Vec<ConversationSummary>>>, ApiError> {
    require_user_id(&query.user_id)?;

    let summaries = state
        .store
        .list_for_user_since(&query.user_id, LIST_WINDOW)
        .map_err(internal_error)?;
    Ok(Json(ApiResponse::ok(summaries)))
}

// GET /api/conversations/{session_id}?user_id=...
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ApiResponse<Conversation>>, ApiError> {
    require_user_id(&query.user_id)?;

    match state
        .store
        .get(&query.user_id, &session_id)
        .map_err(internal_error)?
    {
        Some(conversation) => Ok(Json(ApiResponse::ok(conversation))),
        None => Err(not_found(&session_id)),
    }
}

// GET /api/conversations/{session_id}/download?user_id=...
pub async fn download_conversation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_user_id(&query.user_id)?;

    match state
        .store
        .export_text(&query.user_id, &session_id)
        .map_err(internal_error)?
    {
        Some(document) => Ok((
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"conversation-{session_id}.txt\""),
                ),
            ],
            document,
        )),
        None => Err(not_found(&session_id)),
    }
}
