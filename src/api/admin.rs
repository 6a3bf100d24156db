// src/api/admin.rs
// Health and observability endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::embedding::{TextEmbedder, EMBEDDING_DIM};
use crate::error::AppResult;
use crate::state::AppState;

/// GET /health — reports which providers are configured and whether the
/// three backing stores answer.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (authoritative_ok, shadow_ok, cache_ok) = tokio::join!(
        state.authoritative.health_check(),
        state.shadow.health_check(),
        state.queue.store().ping(),
    );

    let ok = authoritative_ok && shadow_ok && cache_ok;
    let body = json!({
        "ok": ok,
        "providersConfigured": state.config.configured_providers(),
        "storesConnected": {
            "authoritative": authoritative_ok,
            "shadow": shadow_ok,
            "cache": cache_ok,
        },
        "embeddingModel": state.embedder.model_name(),
        "embeddingSize": EMBEDDING_DIM,
    });

    if ok {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

/// GET /api/v1/queues/stats
pub async fn queue_stats(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let stats = state.queue.stats_all().await?;
    Ok(Json(json!({
        "success": true,
        "queues": stats,
    })))
}

/// GET /api/v1/rate-limits
pub async fn rate_limits(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let statuses = state.limiter.status_all().await;
    Ok(Json(json!({
        "success": true,
        "limits": statuses,
    })))
}
