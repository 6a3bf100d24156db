// src/ingest/mod.rs
// Message ingestion: media-to-text extraction through the job queues,
// embedding, dual-store write, and the fire-and-forget summary trigger.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding::{EmbedPrefix, TextEmbedder};
use crate::error::{AppError, AppResult};
use crate::identity::random_id;
use crate::media::MediaFetcher;
use crate::queue::{EnqueueOptions, JobHandle, JobOutcome, JobPayload, JobQueue};
use crate::summary::SummaryService;
use crate::vector::{DualMessageStore, MessageRecord};

/// A media attachment on an incoming message.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Document,
}

/// Validated ingestion input.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub room_id: String,
    pub external_message_id: String,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub media: Vec<MediaItem>,
}

pub struct IngestService {
    queue: Arc<JobQueue>,
    embedder: Arc<dyn TextEmbedder>,
    messages: Arc<DualMessageStore>,
    summaries: Arc<SummaryService>,
    media: Arc<MediaFetcher>,
}

impl IngestService {
    pub fn new(
        queue: Arc<JobQueue>,
        embedder: Arc<dyn TextEmbedder>,
        messages: Arc<DualMessageStore>,
        summaries: Arc<SummaryService>,
        media: Arc<MediaFetcher>,
    ) -> Self {
        Self {
            queue,
            embedder,
            messages,
            summaries,
            media,
        }
    }

    /// Ingest one message. Returns once the record sits in both stores; the
    /// summary updates race the response.
    pub async fn ingest(&self, request: IngestRequest) -> AppResult<MessageRecord> {
        if request.room_id.is_empty() {
            return Err(AppError::Validation("room is required".into()));
        }
        if request.external_message_id.is_empty() {
            return Err(AppError::Validation("initId is required".into()));
        }
        let has_text = request.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        if !has_text && request.media.is_empty() {
            return Err(AppError::Validation(
                "either message or media is required".into(),
            ));
        }

        let extracted = self.extract_media_texts(&request.media).await?;

        let mut parts: Vec<String> = Vec::with_capacity(1 + extracted.len());
        if let Some(text) = &request.text {
            if !text.trim().is_empty() {
                parts.push(text.trim().to_string());
            }
        }
        parts.extend(extracted);
        let combined = parts.join(" ");

        if combined.is_empty() {
            return Err(AppError::Validation("noContent".into()));
        }

        let vector = self
            .embedder
            .embed(&combined, EmbedPrefix::Passage)
            .await
            .map_err(|e| AppError::Store(format!("embedding failed: {e}")))?;

        let record = MessageRecord {
            id: random_id().to_string(),
            external_message_id: request.external_message_id.clone(),
            room_id: request.room_id.clone(),
            sender_id: request.sender_id.clone(),
            sender_name: request.sender_name.clone(),
            text: combined.clone(),
            created_at: request.created_at.unwrap_or_else(Utc::now),
        };

        self.messages
            .store_message(&record, &vector)
            .await
            .map_err(|e| AppError::Store(e.to_string()))?;

        self.trigger_summaries(&request, combined);

        Ok(record)
    }

    /// Enqueue every media extraction up front, then await them in order.
    /// Images yield OCR text and a description; audio a transcript; text
    /// documents are fetched directly.
    async fn extract_media_texts(&self, media: &[MediaItem]) -> AppResult<Vec<String>> {
        enum Pending {
            Job(JobHandle),
            Document(String),
        }

        let mut pending = Vec::new();
        for item in media {
            let url = self.media.resolve(&item.url);
            match item.kind {
                MediaKind::Image => {
                    let ocr = self
                        .queue
                        .enqueue(
                            JobPayload::Ocr {
                                image_url: url.clone(),
                                languages: vec!["ar".to_string(), "en".to_string()],
                            },
                            EnqueueOptions::default(),
                        )
                        .await?;
                    let describe = self
                        .queue
                        .enqueue(
                            JobPayload::Image {
                                image_url: url,
                                prompt: None,
                            },
                            EnqueueOptions::default(),
                        )
                        .await?;
                    pending.push(Pending::Job(ocr));
                    pending.push(Pending::Job(describe));
                }
                MediaKind::Audio => {
                    let transcribe = self
                        .queue
                        .enqueue(
                            JobPayload::Audio {
                                audio_url: url,
                                language: None,
                            },
                            EnqueueOptions::default(),
                        )
                        .await?;
                    pending.push(Pending::Job(transcribe));
                }
                MediaKind::Document => pending.push(Pending::Document(url)),
            }
        }

        let mut texts = Vec::with_capacity(pending.len());
        for entry in pending {
            match entry {
                Pending::Job(handle) => match handle.await_result().await? {
                    JobOutcome::Transcript(t) if !t.text.is_empty() => texts.push(t.text),
                    JobOutcome::Transcript(_) => {}
                    JobOutcome::Description(d) => texts.push(d.description),
                    JobOutcome::OcrText(o) if o.has_text => texts.push(o.text),
                    JobOutcome::OcrText(_) => {}
                    JobOutcome::Completion(c) => {
                        // No LLM jobs are enqueued here; tolerate anyway.
                        warn!("unexpected completion outcome during ingestion");
                        texts.push(c.answer);
                    }
                },
                Pending::Document(url) => {
                    let text = self
                        .media
                        .fetch_text(&url)
                        .await
                        .map_err(|e| AppError::Store(format!("document fetch failed: {e}")))?;
                    if !text.trim().is_empty() {
                        texts.push(text.trim().to_string());
                    }
                }
            }
        }
        Ok(texts)
    }

    /// Detached summary updates. Errors are logged, never surfaced: a
    /// summary miss must not fail the ingest caller.
    fn trigger_summaries(&self, request: &IngestRequest, text: String) {
        let summaries = self.summaries.clone();
        let room_id = request.room_id.clone();
        let sender_id = request.sender_id.clone();
        let sender_name = request.sender_name.clone();

        tokio::spawn(async move {
            if let Err(e) = summaries
                .update_room_summary(&room_id, &text, sender_name.as_deref())
                .await
            {
                warn!("room summary update failed for {}: {:#}", room_id, e);
            }
            if let Some(user_id) = sender_id {
                if let Err(e) = summaries
                    .update_user_personalization(&user_id, &text, sender_name.as_deref())
                    .await
                {
                    warn!("personalization update failed for {}: {:#}", user_id, e);
                }
            }
            debug!("summary updates finished for room {}", room_id);
        });
    }
}
