// src/api/mod.rs
// HTTP router composition for the gateway's REST surface

pub mod admin;
pub mod chat;
pub mod embedding;
pub mod media;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(admin::health))
        // Direct media endpoints
        .route("/transcribe-audio", post(media::transcribe_audio))
        .route("/describe-image", post(media::describe_image))
        .route("/extract-text", post(media::extract_text))
        // Versioned API
        .nest("/api/v1", api_v1_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_v1_router() -> Router<Arc<AppState>> {
    Router::new()
        // Embedding / message store
        .route("/embedding/messages", post(embedding::ingest_message))
        .route("/embedding/search", post(embedding::search))
        .route("/embedding/stats", get(embedding::stats))
        .route(
            "/embedding/rooms/:room_id/summary",
            get(embedding::room_summary),
        )
        .route(
            "/embedding/users/:user_id/personalization-summary",
            get(embedding::user_personalization),
        )
        .route("/embedding/messages/:id", delete(embedding::delete_message))
        .route("/embedding/rooms/:room_id", delete(embedding::delete_room))
        // Chat
        .route("/chat", post(chat::chat))
        .route("/chat/reply", post(chat::reply))
        .route("/chat/history", get(chat::history))
        .route("/chat/history/:room_id", delete(chat::delete_history))
        // Observability
        .route("/queues/stats", get(admin::queue_stats))
        .route("/rate-limits", get(admin::rate_limits))
}
