// src/providers/assemblyai.rs
// AssemblyAI transcription adapter (last audio fallback).
// Upload-then-poll flow: the API has no synchronous endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ProviderError, Transcriber, Transcript};
use crate::media::MediaFetcher;

const PROVIDER: &str = "assemblyai";
const BASE_URL: &str = "https://api.assemblyai.com/v2";
const MODEL: &str = "universal";

/// Poll cadence and cap. The dispatcher's 120s audio timeout is the real
/// bound; this just keeps the loop finite on its own.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 55;

pub struct AssemblyAiTranscriber {
    api_key: String,
    client: Client,
    media: Arc<MediaFetcher>,
}

impl AssemblyAiTranscriber {
    pub fn new(api_key: String, media: Arc<MediaFetcher>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            client,
            media,
        }
    }

    async fn upload(&self, bytes: Vec<u8>) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{BASE_URL}/upload"))
            .header("Authorization", &self.api_key)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status, text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        body.get("upload_url")
            .and_then(|u| u.as_str())
            .map(String::from)
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER,
                message: "missing upload_url".to_string(),
            })
    }

    async fn poll(&self, transcript_id: &str) -> Result<Value, ProviderError> {
        for _ in 0..MAX_POLLS {
            let response = self
                .client
                .get(format!("{BASE_URL}/transcript/{transcript_id}"))
                .header("Authorization", &self.api_key)
                .send()
                .await
                .map_err(|e| ProviderError::network(PROVIDER, e))?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(PROVIDER, status, text));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| ProviderError::Malformed {
                    provider: PROVIDER,
                    message: e.to_string(),
                })?;

            match body.get("status").and_then(|s| s.as_str()) {
                Some("completed") => return Ok(body),
                Some("error") => {
                    let message = body
                        .get("error")
                        .and_then(|e| e.as_str())
                        .unwrap_or("transcription failed")
                        .to_string();
                    return Err(ProviderError::Transient {
                        provider: PROVIDER,
                        message,
                    });
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }

        Err(ProviderError::Transient {
            provider: PROVIDER,
            message: "transcription did not complete in time".to_string(),
        })
    }
}

#[async_trait]
impl Transcriber for AssemblyAiTranscriber {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn transcribe(
        &self,
        audio_url: &str,
        language: Option<&str>,
    ) -> Result<Transcript, ProviderError> {
        let media = self
            .media
            .fetch(audio_url)
            .await
            .map_err(|e| ProviderError::Transient {
                provider: PROVIDER,
                message: format!("audio fetch failed: {e}"),
            })?;

        let upload_url = self.upload(media.bytes).await?;
        debug!("assemblyai upload complete");

        let mut request = json!({ "audio_url": upload_url, "speech_model": MODEL });
        match language {
            Some(lang) => request["language_code"] = json!(lang),
            None => request["language_detection"] = json!(true),
        }

        let response = self
            .client
            .post(format!("{BASE_URL}/transcript"))
            .header("Authorization", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status, text));
        }

        let created: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let transcript_id = created
            .get("id")
            .and_then(|i| i.as_str())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER,
                message: "missing transcript id".to_string(),
            })?;

        let completed = self.poll(transcript_id).await?;

        let text = completed
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(Transcript {
            text,
            language: completed
                .get("language_code")
                .and_then(|l| l.as_str())
                .map(String::from)
                .or_else(|| language.map(String::from)),
            confidence: completed.get("confidence").and_then(|c| c.as_f64()),
            duration_seconds: completed.get("audio_duration").and_then(|d| d.as_f64()),
            provider: PROVIDER.to_string(),
            model: MODEL.to_string(),
        })
    }
}
