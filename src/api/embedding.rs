// src/api/embedding.rs
// Message ingestion, similarity search, aggregate reads and deletion.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::embedding::{EmbedPrefix, TextEmbedder, EMBEDDING_DIM};
use crate::error::{AppError, AppResult};
use crate::ingest::{IngestRequest, MediaItem};
use crate::state::AppState;
use crate::vector::collections;

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 100;
const DEFAULT_MIN_SCORE: f32 = 0.5;

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub room: String,
    pub message: Option<String>,
    pub media: Option<Vec<MediaItem>>,
    #[serde(rename = "initId")]
    pub init_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    pub from: Option<String>,
    pub from_name: Option<String>,
}

pub async fn ingest_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestBody>,
) -> AppResult<Json<Value>> {
    let started = Instant::now();

    let record = state
        .ingest
        .ingest(IngestRequest {
            room_id: body.room,
            external_message_id: body.init_id,
            sender_id: body.from,
            sender_name: body.from_name,
            created_at: body.created_at,
            text: body.message,
            media: body.media.unwrap_or_default(),
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "id": record.external_message_id,
            "storeId": record.id,
            "room_id": record.room_id,
            "sender_id": record.sender_id,
            "sender_name": record.sender_name,
            "text": record.text,
            "created_at": record.created_at.to_rfc3339(),
        },
        "processingTime": started.elapsed().as_millis() as u64,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub room: Option<String>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchBody>,
) -> AppResult<Json<Value>> {
    let started = Instant::now();

    if body.query.trim().is_empty() {
        return Err(AppError::Validation("query is required".into()));
    }
    let top_k = body.top_k.unwrap_or(DEFAULT_TOP_K);
    if top_k < 1 || top_k > MAX_TOP_K {
        return Err(AppError::Validation(format!(
            "topK must be between 1 and {MAX_TOP_K}"
        )));
    }
    let min_score = body.min_score.unwrap_or(DEFAULT_MIN_SCORE);

    let vector = state
        .embedder
        .embed(&body.query, EmbedPrefix::Query)
        .await
        .map_err(|e| AppError::Store(format!("embedding failed: {e}")))?;

    let (authoritative, shadow) = state
        .messages
        .search(&vector, top_k, min_score, body.room.as_deref())
        .await
        .map_err(|e| AppError::Store(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "query": body.query,
        "results": {
            "authoritative": authoritative,
            "shadow": shadow,
        },
        "metadata": {
            "topK": top_k,
            "minScore": min_score,
            "room": body.room,
            "embeddingModel": state.embedder.model_name(),
            "processingTime": started.elapsed().as_millis() as u64,
        },
    })))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let (authoritative_messages, shadow_messages) = state
        .messages
        .counts(None)
        .await
        .map_err(|e| AppError::Store(e.to_string()))?;
    let rooms = state
        .authoritative
        .count(collections::ROOMS, None)
        .await
        .unwrap_or(0);
    let users = state
        .authoritative
        .count(collections::USERS, None)
        .await
        .unwrap_or(0);
    let ai_chats = state.history.count().await.unwrap_or(0);

    Ok(Json(json!({
        "success": true,
        "collections": {
            "messages": {
                "authoritative": authoritative_messages,
                "shadow": shadow_messages,
            },
            "rooms": rooms,
            "users": users,
            "aiChatMessages": ai_chats,
        },
        "embedding": {
            "model": state.embedder.model_name(),
            "dimensions": EMBEDDING_DIM,
        },
    })))
}

pub async fn room_summary(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let aggregate = state
        .summaries
        .get_room(&room_id)
        .await
        .map_err(|e| AppError::Store(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("no summary for room {room_id}")))?;

    Ok(Json(json!({
        "success": true,
        "roomId": aggregate.room_id,
        "summary": aggregate.summary,
        "messageCount": aggregate.message_count,
    })))
}

pub async fn user_personalization(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Value>> {
    let aggregate = state
        .summaries
        .get_user(&user_id)
        .await
        .map_err(|e| AppError::Store(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("no profile for user {user_id}")))?;

    Ok(Json(json!({
        "success": true,
        "userId": aggregate.user_id,
        "personalizationSummary": aggregate.personalization_summary,
        "messageCount": aggregate.message_count,
    })))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state
        .messages
        .delete_message(&id)
        .await
        .map_err(|e| AppError::Store(e.to_string()))?;
    Ok(Json(json!({ "success": true })))
}

/// Room purge: messages from both stores plus the room aggregate.
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    state
        .messages
        .delete_room_messages(&room_id)
        .await
        .map_err(|e| AppError::Store(e.to_string()))?;
    state
        .summaries
        .delete_room(&room_id)
        .await
        .map_err(|e| AppError::Store(e.to_string()))?;
    Ok(Json(json!({ "success": true })))
}
