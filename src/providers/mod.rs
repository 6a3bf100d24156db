// src/providers/mod.rs
// Uniform call surface over the third-party AI providers.
//
// One adapter per provider per service. Adapters are stateless aside from an
// initialised credential and surface failures as typed `ProviderError`s so
// the dispatcher can tell auth problems from transient ones.

pub mod assemblyai;
pub mod chain;
pub mod deepgram;
pub mod gemini;
pub mod groq;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed provider failure. The dispatcher advances the fallback chain on any
/// of these; `RateLimited` additionally feeds the retry-after bookkeeping.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} rejected the credential")]
    Auth { provider: &'static str },

    #[error("{provider} rate limited the request")]
    RateLimited {
        provider: &'static str,
        retry_after: Option<u64>,
    },

    #[error("{provider} transient failure: {message}")]
    Transient {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} returned a malformed response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Classify an HTTP error status the provider returned.
    pub fn from_status(
        provider: &'static str,
        status: reqwest::StatusCode,
        body: String,
    ) -> Self {
        match status.as_u16() {
            401 | 403 => ProviderError::Auth { provider },
            429 => ProviderError::RateLimited {
                provider,
                retry_after: None,
            },
            400 | 404 | 422 => ProviderError::Malformed {
                provider,
                message: format!("{status}: {body}"),
            },
            _ => ProviderError::Transient {
                provider,
                message: format!("{status}: {body}"),
            },
        }
    }

    pub fn network(provider: &'static str, err: reqwest::Error) -> Self {
        ProviderError::Transient {
            provider,
            message: err.to_string(),
        }
    }
}

/// Transcript of an audio clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub confidence: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub provider: String,
    pub model: String,
}

/// Natural-language description of an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDescription {
    pub description: String,
    pub provider: String,
    pub model: String,
}

/// Text extracted from an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrText {
    pub text: String,
    pub has_text: bool,
    pub languages: Vec<String>,
    pub provider: String,
    pub model: String,
}

/// One generated completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub answer: String,
    pub provider: String,
    pub model: String,
}

/// Parameters of a text-generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcribe(
        &self,
        audio_url: &str,
        language: Option<&str>,
    ) -> Result<Transcript, ProviderError>;
}

#[async_trait]
pub trait VisionDescriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn describe(
        &self,
        image_url: &str,
        prompt: &str,
    ) -> Result<ImageDescription, ProviderError>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract_text(
        &self,
        image_url: &str,
        languages: &[String],
    ) -> Result<OcrText, ProviderError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion, ProviderError>;
}

/// Default description prompt when the caller supplies none.
pub const DEFAULT_DESCRIBE_PROMPT: &str =
    "Describe this image concisely in the language of any visible text, or in Arabic if none.";

/// Strict extract-only OCR prompt. The sentinel maps to `has_text = false`.
pub const OCR_PROMPT: &str = "Extract all text visible in this image exactly as written, \
preserving line breaks. Output only the extracted text with no commentary. \
If the image contains no readable text, output exactly NO_TEXT.";

/// Sentinel the OCR prompt asks for when an image carries no text.
pub const NO_TEXT_SENTINEL: &str = "NO_TEXT";

/// Interpret a vision model's OCR output, mapping the sentinel.
pub fn ocr_from_model_output(
    raw: &str,
    languages: &[String],
    provider: &str,
    model: &str,
) -> OcrText {
    let trimmed = raw.trim();
    let has_text = !trimmed.is_empty() && trimmed != NO_TEXT_SENTINEL;
    OcrText {
        text: if has_text { trimmed.to_string() } else { String::new() },
        has_text,
        languages: languages.to_vec(),
        provider: provider.to_string(),
        model: model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let auth = ProviderError::from_status("groq", reqwest::StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(auth, ProviderError::Auth { .. }));

        let rate =
            ProviderError::from_status("groq", reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(matches!(rate, ProviderError::RateLimited { .. }));

        let transient =
            ProviderError::from_status("groq", reqwest::StatusCode::BAD_GATEWAY, String::new());
        assert!(matches!(transient, ProviderError::Transient { .. }));

        let malformed =
            ProviderError::from_status("groq", reqwest::StatusCode::UNPROCESSABLE_ENTITY, String::new());
        assert!(matches!(malformed, ProviderError::Malformed { .. }));
    }

    #[test]
    fn ocr_sentinel_maps_to_no_text() {
        let out = ocr_from_model_output("NO_TEXT", &[], "groq", "m");
        assert!(!out.has_text);
        assert!(out.text.is_empty());

        let out = ocr_from_model_output("  NO_TEXT  ", &[], "groq", "m");
        assert!(!out.has_text);

        let out = ocr_from_model_output("مرحبا بالعالم", &["ar".to_string()], "groq", "m");
        assert!(out.has_text);
        assert_eq!(out.text, "مرحبا بالعالم");
        assert_eq!(out.languages, vec!["ar".to_string()]);
    }

    #[test]
    fn empty_ocr_output_counts_as_no_text() {
        let out = ocr_from_model_output("   ", &[], "gemini", "m");
        assert!(!out.has_text);
    }
}
