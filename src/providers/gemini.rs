// src/providers/gemini.rs
// Gemini adapters: vision fallback (description + OCR) and LLM fallback

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{
    ocr_from_model_output, Completion, GenerationRequest, ImageDescription, OcrEngine, OcrText,
    ProviderError, TextGenerator, VisionDescriber, OCR_PROMPT,
};
use crate::media::MediaFetcher;

const PROVIDER: &str = "gemini";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MODEL: &str = "gemini-2.0-flash";

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// First candidate's text parts, concatenated.
fn candidate_text(response: &Value) -> Result<String, ProviderError> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER,
            message: "missing candidates[0].content.parts".to_string(),
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(ProviderError::Malformed {
            provider: PROVIDER,
            message: "candidate carried no text".to_string(),
        });
    }
    Ok(text)
}

async fn generate_content(
    client: &Client,
    api_key: &str,
    body: Value,
) -> Result<Value, ProviderError> {
    let url = format!("{BASE_URL}/{MODEL}:generateContent?key={api_key}");
    let response = client
        .post(&url)
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

/// Gemini vision adapter; serves both the description and OCR surfaces.
pub struct GeminiVision {
    api_key: String,
    client: Client,
    media: Arc<MediaFetcher>,
}

impl GeminiVision {
    pub fn new(api_key: String, media: Arc<MediaFetcher>) -> Self {
        Self {
            api_key,
            client: http_client(),
            media,
        }
    }

    async fn vision_call(
        &self,
        image_url: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError> {
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

        let body = json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"inline_data": {"mime_type": mime, "data": encoded}}
                ]
            }],
            "generationConfig": {
                "maxOutputTokens": 1024,
                "temperature": temperature,
            }
        });

        let response = generate_content(&self.client, &self.api_key, body).await?;
        candidate_text(&response)
    }
}

#[async_trait]
impl VisionDescriber for GeminiVision {
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
            model: MODEL.to_string(),
        })
    }
}

#[async_trait]
impl OcrEngine for GeminiVision {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn extract_text(
        &self,
        image_url: &str,
        languages: &[String],
    ) -> Result<OcrText, ProviderError> {
        let raw = self.vision_call(image_url, OCR_PROMPT, 0.0).await?;
        Ok(ocr_from_model_output(&raw, languages, PROVIDER, MODEL))
    }
}

pub struct GeminiGenerator {
    api_key: String,
    client: Client,
}

impl GeminiGenerator {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http_client(),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, ProviderError> {
        let mut body = json!({
            "contents": [{
                "parts": [{"text": request.prompt}]
            }],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            }
        });
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let response = generate_content(&self.client, &self.api_key, body).await?;
        let answer = candidate_text(&response)?;

        Ok(Completion {
            answer,
            provider: PROVIDER.to_string(),
            model: MODEL.to_string(),
        })
    }
}
