// src/api/chat.rs
// Chat, reply and chat-history endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::chat::history::HistoryQuery;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub room_id: String,
    pub user_id: String,
    pub user_question: String,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> AppResult<Json<Value>> {
    if body.room_id.is_empty() || body.user_id.is_empty() {
        return Err(AppError::Validation("roomId and userId are required".into()));
    }
    if body.user_question.trim().is_empty() {
        return Err(AppError::Validation("userQuestion is required".into()));
    }

    let answer = state
        .chat
        .chat(&body.room_id, &body.user_id, body.user_question.trim())
        .await?;

    Ok(Json(json!({
        "success": true,
        "answer": answer.answer,
        "suggestedAnswer": answer.suggested_answer,
        "provider": answer.provider,
        "model": answer.model,
        "context": answer.context,
        "metadata": {
            "processingTimeMs": answer.processing_ms,
        },
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyBody {
    pub room_id: String,
    pub sender_id: String,
    pub message_id: String,
}

pub async fn reply(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReplyBody>,
) -> AppResult<Json<Value>> {
    if body.room_id.is_empty() || body.sender_id.is_empty() || body.message_id.is_empty() {
        return Err(AppError::Validation(
            "roomId, senderId and messageId are required".into(),
        ));
    }

    let reply = state
        .chat
        .reply(&body.room_id, &body.sender_id, &body.message_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "answer": reply.answer,
        "suggestedAnswer": reply.suggested_answer,
        "targetMessage": {
            "id": reply.target.external_message_id,
            "senderId": reply.target.sender_id,
            "senderName": reply.target.sender_name,
            "text": reply.target.text,
            "createdAt": reply.target.created_at.to_rfc3339(),
        },
        "context": reply.context,
        "metadata": {
            "provider": reply.provider,
            "model": reply.model,
            "processingTimeMs": reply.processing_ms,
        },
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub user_id: Option<String>,
    pub room_id: Option<String>,
    pub limit: Option<usize>,
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<Value>> {
    if params.user_id.is_none() && params.room_id.is_none() {
        return Err(AppError::Validation(
            "at least one of userId or roomId is required".into(),
        ));
    }

    let records = state
        .history
        .query(HistoryQuery {
            user_id: params.user_id,
            room_id: params.room_id,
            limit: params.limit.unwrap_or(50),
        })
        .await
        .map_err(|e| AppError::Store(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "count": records.len(),
        "history": records,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteHistoryParams {
    pub user_id: Option<String>,
}

pub async fn delete_history(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(params): Query<DeleteHistoryParams>,
) -> AppResult<Json<Value>> {
    state
        .history
        .delete_for_room(&room_id, params.user_id.as_deref())
        .await
        .map_err(|e| AppError::Store(e.to_string()))?;
    Ok(Json(json!({ "success": true })))
}
