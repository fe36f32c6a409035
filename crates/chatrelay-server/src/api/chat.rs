//! Chat endpoints: streaming relay and the synchronous variant.

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::Sse,
    response::sse::Event,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use chatrelay_core::SendMessageRequest;
use chatrelay_models::{Attachment, StreamEvent, TokenUsage};

use crate::api::{ApiResponse, state::AppState};

/// At most this many images may accompany one message.
const MAX_IMAGES: usize = 5;

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub images: Vec<ImagePayload>,
    #[serde(default)]
    pub shell_id: Option<String>,
    #[serde(default)]
    pub origin_url: Option<String>,
    #[serde(default)]
    pub context: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct ImagePayload {
    #[serde(default = "default_image_kind")]
    pub kind: String,
    #[serde(default)]
    pub filename: String,
    pub data: String,
}

fn default_image_kind() -> String {
    "image".to_string()
}

#[derive(Debug, Serialize)]
pub struct ChatPayload {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub model: String,
}

fn validation_error(code: &str, message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::error_with_code(code, message)),
    )
}

/// Reject bad requests before any store write or billing call happens.
fn validate(body: SendMessageBody) -> Result<SendMessageRequest, ApiError> {
    if body.session_id.trim().is_empty() {
        return Err(validation_error("MISSING_FIELD", "session_id is required"));
    }
    if body.user_id.trim().is_empty() {
        return Err(validation_error("MISSING_FIELD", "user_id is required"));
    }
    if body.message.trim().is_empty() {
        return Err(validation_error("MISSING_FIELD", "message is required"));
    }
    if body.images.len() > MAX_IMAGES {
        return Err(validation_error(
            "TOO_MANY_IMAGES",
            "at most 5 images are allowed per message",
        ));
    }

    tracing::debug!(
        session_id = %body.session_id,
        shell_id = ?body.shell_id,
        origin_url = ?body.origin_url,
        "Accepted send-message request"
    );

    Ok(SendMessageRequest {
        session_id: body.session_id,
        user_id: body.user_id,
        message: body.message,
        images: body
            .images
            .into_iter()
            .map(|image| Attachment {
                kind: image.kind,
                filename: image.filename,
                data: image.data,
            })
            .collect(),
        context: body.context,
    })
}

// POST /api/chat/stream
pub async fn send_message_stream(
    State(state): State<AppState>,
    Json(body): Json<SendMessageBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = validate(body)?;

    // The lifecycle runs on its own task: a client that disconnects
    // mid-stream drops the receiver and stops the relay, but persistence
    // and settlement still complete.
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let mut events = orchestrator.send_message_stream(request);
        while let Some(event) = events.next().await {
            let _ = tx.send(event).await;
        }
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let done = event.is_terminal();
            let wire = Event::default()
                .event(event.event_name())
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().event("error").data("{}"));
            yield Ok::<_, Infallible>(wire);
            if done {
                break;
            }
        }
    };

    Ok(Sse::new(stream))
}

// POST /api/chat
pub async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<ApiResponse<ChatPayload>>, ApiError> {
    let request = validate(body)?;

    match state.orchestrator.send_message(request).await {
        Ok(completion) => Ok(Json(ApiResponse::ok(ChatPayload {
            content: completion.content,
            usage: completion.usage,
            model: completion.model,
        }))),
        Err(error) => Ok(Json(ApiResponse::error_with_code(
            error.code.as_str(),
            error.message,
        ))),
    }
}
