pub mod billing;
pub mod chat;
pub mod conversations;
pub mod response;
pub mod state;

pub use response::ApiResponse;

use axum::{
    Router,
    routing::{get, post},
};

use state::AppState;

/// Assemble the API router over the shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat/stream", post(chat::send_message_stream))
        .route("/api/chat", post(chat::send_message))
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/{session_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/api/conversations/{session_id}/download",
            get(conversations::download_conversation),
        )
        .route("/api/balance", get(billing::get_balance))
        .route("/api/identity/resolve", post(billing::resolve_identity))
        .with_state(state)
}

#[derive(serde::Serialize)]
struct Health {
    status: String,
}

async fn health() -> axum::Json<Health> {
    axum::Json(Health {
        status: "chatrelay is working!".to_string(),
    })
}
