// src/api/media.rs
// Direct media endpoints: one-off transcription, description and OCR calls
// that run through the same queues as ingestion.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::queue::{EnqueueOptions, JobOutcome, JobPayload};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub audio_url: String,
}

pub async fn transcribe_audio(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TranscribeRequest>,
) -> AppResult<Json<Value>> {
    if request.audio_url.is_empty() {
        return Err(AppError::Validation("audioUrl is required".into()));
    }

    let url = state.media.resolve(&request.audio_url);
    let handle = state
        .queue
        .enqueue(
            JobPayload::Audio {
                audio_url: url,
                language: None,
            },
            EnqueueOptions::default(),
        )
        .await?;

    match handle.await_result().await? {
        JobOutcome::Transcript(transcript) => Ok(Json(json!({
            "success": true,
            "text": transcript.text,
            "audioUrl": request.audio_url,
            "language": transcript.language,
            "provider": transcript.provider,
            "model": transcript.model,
        }))),
        other => Err(AppError::Internal(anyhow::anyhow!(
            "audio job returned unexpected outcome: {other:?}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRequest {
    pub image_url: String,
    pub prompt: Option<String>,
}

pub async fn describe_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DescribeRequest>,
) -> AppResult<Json<Value>> {
    if request.image_url.is_empty() {
        return Err(AppError::Validation("imageUrl is required".into()));
    }

    let url = state.media.resolve(&request.image_url);
    let handle = state
        .queue
        .enqueue(
            JobPayload::Image {
                image_url: url,
                prompt: request.prompt.clone(),
            },
            EnqueueOptions::default(),
        )
        .await?;

    match handle.await_result().await? {
        JobOutcome::Description(description) => Ok(Json(json!({
            "success": true,
            "description": description.description,
            "imageUrl": request.image_url,
            "prompt": request.prompt,
            "provider": description.provider,
            "model": description.model,
        }))),
        other => Err(AppError::Internal(anyhow::anyhow!(
            "image job returned unexpected outcome: {other:?}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTextRequest {
    pub image_url: String,
}

pub async fn extract_text(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractTextRequest>,
) -> AppResult<Json<Value>> {
    if request.image_url.is_empty() {
        return Err(AppError::Validation("imageUrl is required".into()));
    }

    let url = state.media.resolve(&request.image_url);
    let handle = state
        .queue
        .enqueue(
            JobPayload::Ocr {
                image_url: url,
                languages: vec!["ar".to_string(), "en".to_string()],
            },
            EnqueueOptions::default(),
        )
        .await?;

    match handle.await_result().await? {
        JobOutcome::OcrText(ocr) => Ok(Json(json!({
            "success": true,
            "text": ocr.text,
            "hasText": ocr.has_text,
            "imageUrl": request.image_url,
            "provider": ocr.provider,
            "model": ocr.model,
        }))),
        other => Err(AppError::Internal(anyhow::anyhow!(
            "ocr job returned unexpected outcome: {other:?}"
        ))),
    }
}
