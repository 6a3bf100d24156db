// src/providers/deepgram.rs
// Deepgram transcription adapter (first audio fallback)

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::{ProviderError, Transcriber, Transcript};
use crate::media::MediaFetcher;

const PROVIDER: &str = "deepgram";
const BASE_URL: &str = "https://api.deepgram.com/v1/listen";
const MODEL: &str = "nova-2";

pub struct DeepgramTranscriber {
    api_key: String,
    client: Client,
    media: Arc<MediaFetcher>,
}

impl DeepgramTranscriber {
    pub fn new(api_key: String, media: Arc<MediaFetcher>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(110))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            client,
            media,
        }
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
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

        let mut url = format!("{BASE_URL}?model={MODEL}&smart_format=true");
        match language {
            Some(lang) => url.push_str(&format!("&language={lang}")),
            None => url.push_str("&detect_language=true"),
        }

        let mime = media.mime.clone().unwrap_or_else(|| "audio/mpeg".to_string());
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", mime)
            .body(media.bytes)
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

        let alternative = body
            .pointer("/results/channels/0/alternatives/0")
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER,
                message: "missing results.channels[0].alternatives[0]".to_string(),
            })?;

        let text = alternative
            .get("transcript")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(Transcript {
            text,
            language: body
                .pointer("/results/channels/0/detected_language")
                .and_then(|l| l.as_str())
                .map(String::from)
                .or_else(|| language.map(String::from)),
            confidence: alternative.get("confidence").and_then(|c| c.as_f64()),
            duration_seconds: body.pointer("/metadata/duration").and_then(|d| d.as_f64()),
            provider: PROVIDER.to_string(),
            model: MODEL.to_string(),
        })
    }
}
