// src/providers/groq.rs
// Groq adapters: Whisper transcription, Llama vision (description + OCR),
// and Llama text generation via the OpenAI-compatible API.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    ocr_from_model_output, Completion, GenerationRequest, ImageDescription, OcrEngine, OcrText,
    ProviderError, TextGenerator, Transcriber, Transcript, VisionDescriber, OCR_PROMPT,
};
use crate::media::MediaFetcher;

const PROVIDER: &str = "groq";
const BASE_URL: &str = "https://api.groq.com/openai/v1";
const WHISPER_MODEL: &str = "whisper-large-v3";
const VISION_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";
const LLM_MODEL: &str = "llama-3.3-70b-versatile";

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// Pull the first choice's message content out of a chat-completions body.
fn chat_content(response: &Value) -> Result<&str, ProviderError> {
    response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER,
            message: "missing choices[0].message.content".to_string(),
        })
}

async fn post_chat(
    client: &Client,
    api_key: &str,
    body: Value,
) -> Result<Value, ProviderError> {
    let response = client
        .post(format!("{BASE_URL}/chat/completions"))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProviderError::network(PROVIDER, e))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(PROVIDER, status, text));
    }

    response
        .json()
        .await
        .map_err(|e| ProviderError::Malformed {
            provider: PROVIDER,
            message: e.to_string(),
        })
}

pub struct GroqTranscriber {
    api_key: String,
    client: Client,
    media: Arc<MediaFetcher>,
}

impl GroqTranscriber {
    pub fn new(api_key: String, media: Arc<MediaFetcher>) -> Self {
        Self {
            api_key,
            client: http_client(),
            media,
        }
    }
}

#[async_trait]
impl Transcriber for GroqTranscriber {
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

        let filename = format!("audio.{}", media.extension());
        let part = reqwest::multipart::Part::bytes(media.bytes).file_name(filename);
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", WHISPER_MODEL)
            .text("response_format", "verbose_json");
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .client
            .post(format!("{BASE_URL}/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
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

        let text = body
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER,
                message: "missing transcript text".to_string(),
            })?
            .trim()
            .to_string();

        debug!("groq transcribed {} chars", text.len());

        Ok(Transcript {
            text,
            language: body
                .get("language")
                .and_then(|l| l.as_str())
                .map(String::from)
                .or_else(|| language.map(String::from)),
            confidence: None,
            duration_seconds: body.get("duration").and_then(|d| d.as_f64()),
            provider: PROVIDER.to_string(),
            model: WHISPER_MODEL.to_string(),
        })
    }
}

/// Groq vision adapter; serves both the description and OCR surfaces.
pub struct GroqVision {
    api_key: String,
    client: Client,
    media: Arc<MediaFetcher>,
}

impl GroqVision {
    pub fn new(api_key: String, media: Arc<MediaFetcher>) -> Self {
        Self {
            api_key,
            client: http_client(),
            media,
        }
    }

    /// Fetch the image and inline it as a data URL. Groq only accepts public
    /// URLs otherwise, and room media sits behind the sender backend.
    async fn image_data_url(&self, image_url: &str) -> Result<String, ProviderError> {
        let media = self
            .media
            .fetch(image_url)
            .await
            .map_err(|e| ProviderError::Transient {
                provider: PROVIDER,
                message: format!("image fetch failed: {e}"),
            })?;
        let mime = media.mime.clone().unwrap_or_else(|| "image/jpeg".to_string());
        let encoded = base64::engine::general_purpose::STANDARD.encode(&media.bytes);
        Ok(format!("data:{mime};base64,{encoded}"))
    }

    async fn vision_call(
        &self,
        image_url: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let data_url = self.image_data_url(image_url).await?;
        let body = json!({
            "model": VISION_MODEL,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]
            }],
            "max_tokens": 1024,
            "temperature": temperature,
        });

        let response = post_chat(&self.client, &self.api_key, body).await?;
        Ok(chat_content(&response)?.to_string())
    }
}

#[async_trait]
impl VisionDescriber for GroqVision {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn describe(
        &self,
        image_url: &str,
        prompt: &str,
    ) -> Result<ImageDescription, ProviderError> {
        let description = self.vision_call(image_url, prompt, 0.4).await?;
        Ok(ImageDescription {
            description: description.trim().to_string(),
            provider: PROVIDER.to_string(),
            model: VISION_MODEL.to_string(),
        })
    }
}

#[async_trait]
impl OcrEngine for GroqVision {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn extract_text(
        &self,
        image_url: &str,
        languages: &[String],
    ) -> Result<OcrText, ProviderError> {
        let raw = self.vision_call(image_url, OCR_PROMPT, 0.0).await?;
        Ok(ocr_from_model_output(&raw, languages, PROVIDER, VISION_MODEL))
    }
}

pub struct GroqGenerator {
    api_key: String,
    client: Client,
}

impl GroqGenerator {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http_client(),
        }
    }
}

#[async_trait]
impl TextGenerator for GroqGenerator {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": LLM_MODEL,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response = post_chat(&self.client, &self.api_key, body).await?;
        let answer = chat_content(&response)?.to_string();

        Ok(Completion {
            answer,
            provider: PROVIDER.to_string(),
            model: LLM_MODEL.to_string(),
        })
    }
}
