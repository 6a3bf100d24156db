// src/providers/chain.rs
// Ordered provider chains, executed under the rate limiter.
//
// A limiter denial is NOT a provider failure: the next provider is tried
// within the same job attempt and no retry is consumed. Counters are bumped
// only after a successful call.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::{
    Completion, GenerationRequest, ImageDescription, OcrEngine, OcrText, TextGenerator,
    Transcriber, Transcript, VisionDescriber,
};
use crate::config::Config;
use crate::limiter::{RateLimitGuard, Service};
use crate::media::MediaFetcher;

use super::assemblyai::AssemblyAiTranscriber;
use super::deepgram::DeepgramTranscriber;
use super::gemini::{GeminiGenerator, GeminiVision};
use super::groq::{GroqGenerator, GroqTranscriber, GroqVision};

/// Failure of a whole chain, after every member was tried.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Every member was denied by the limiter; carries the largest window.
    #[error("all providers rate limited, retry after {retry_after}s")]
    AllRateLimited { retry_after: u64 },

    /// At least one member was actually invoked and the chain still failed.
    #[error("provider chain exhausted, last failure from {provider}: {message}")]
    Exhausted {
        provider: &'static str,
        message: String,
    },

    /// No credentials configured for this service at all.
    #[error("no providers configured for {service}")]
    Empty { service: &'static str },
}

/// The four typed fallback chains, built once from configured credentials.
pub struct ProviderChains {
    pub audio: Vec<Arc<dyn Transcriber>>,
    pub image: Vec<Arc<dyn VisionDescriber>>,
    pub ocr: Vec<Arc<dyn OcrEngine>>,
    pub llm: Vec<Arc<dyn TextGenerator>>,
}

impl ProviderChains {
    /// Chain order is fixed: Groq leads everywhere, with Deepgram then
    /// AssemblyAI behind it for audio and Gemini elsewhere. A provider with
    /// no credential simply leaves its slot out.
    pub fn from_config(config: &Config, media: Arc<MediaFetcher>) -> Self {
        let mut audio: Vec<Arc<dyn Transcriber>> = Vec::new();
        let mut image: Vec<Arc<dyn VisionDescriber>> = Vec::new();
        let mut ocr: Vec<Arc<dyn OcrEngine>> = Vec::new();
        let mut llm: Vec<Arc<dyn TextGenerator>> = Vec::new();

        if let Some(key) = &config.groq_api_key {
            audio.push(Arc::new(GroqTranscriber::new(key.clone(), media.clone())));
            let vision = Arc::new(GroqVision::new(key.clone(), media.clone()));
            image.push(vision.clone());
            ocr.push(vision);
            llm.push(Arc::new(GroqGenerator::new(key.clone())));
        }
        if let Some(key) = &config.deepgram_api_key {
            audio.push(Arc::new(DeepgramTranscriber::new(key.clone(), media.clone())));
        }
        if let Some(key) = &config.assemblyai_api_key {
            audio.push(Arc::new(AssemblyAiTranscriber::new(key.clone(), media.clone())));
        }
        if let Some(key) = &config.gemini_api_key {
            let vision = Arc::new(GeminiVision::new(key.clone(), media.clone()));
            image.push(vision.clone());
            ocr.push(vision);
            llm.push(Arc::new(GeminiGenerator::new(key.clone())));
        }

        Self { audio, image, ocr, llm }
    }

    pub async fn run_transcription(
        &self,
        limiter: &RateLimitGuard,
        audio_url: &str,
        language: Option<&str>,
    ) -> Result<Transcript, ChainError> {
        if self.audio.is_empty() {
            return Err(ChainError::Empty { service: "transcription" });
        }

        let mut max_retry_after: Option<u64> = None;
        let mut last_failure: Option<(&'static str, String)> = None;

        for provider in &self.audio {
            let decision = limiter.check(provider.name(), Service::Transcription).await;
            if !decision.allowed {
                note_denied(&mut max_retry_after, decision.retry_after_seconds, provider.name());
                continue;
            }
            match provider.transcribe(audio_url, language).await {
                Ok(result) => {
                    limiter.increment(provider.name(), Service::Transcription).await;
                    info!("transcription served by {}", provider.name());
                    return Ok(result);
                }
                Err(e) => {
                    warn!("{} transcription failed: {}", provider.name(), e);
                    last_failure = Some((provider.name(), e.to_string()));
                }
            }
        }

        Err(exhausted(last_failure, max_retry_after))
    }

    pub async fn run_description(
        &self,
        limiter: &RateLimitGuard,
        image_url: &str,
        prompt: &str,
    ) -> Result<ImageDescription, ChainError> {
        if self.image.is_empty() {
            return Err(ChainError::Empty { service: "vision" });
        }

        let mut max_retry_after: Option<u64> = None;
        let mut last_failure: Option<(&'static str, String)> = None;

        for provider in &self.image {
            let decision = limiter.check(provider.name(), Service::Vision).await;
            if !decision.allowed {
                note_denied(&mut max_retry_after, decision.retry_after_seconds, provider.name());
                continue;
            }
            match provider.describe(image_url, prompt).await {
                Ok(result) => {
                    limiter.increment(provider.name(), Service::Vision).await;
                    info!("image description served by {}", provider.name());
                    return Ok(result);
                }
                Err(e) => {
                    warn!("{} description failed: {}", provider.name(), e);
                    last_failure = Some((provider.name(), e.to_string()));
                }
            }
        }

        Err(exhausted(last_failure, max_retry_after))
    }

    pub async fn run_ocr(
        &self,
        limiter: &RateLimitGuard,
        image_url: &str,
        languages: &[String],
    ) -> Result<OcrText, ChainError> {
        if self.ocr.is_empty() {
            return Err(ChainError::Empty { service: "ocr" });
        }

        let mut max_retry_after: Option<u64> = None;
        let mut last_failure: Option<(&'static str, String)> = None;

        for provider in &self.ocr {
            let decision = limiter.check(provider.name(), Service::Ocr).await;
            if !decision.allowed {
                note_denied(&mut max_retry_after, decision.retry_after_seconds, provider.name());
                continue;
            }
            match provider.extract_text(image_url, languages).await {
                Ok(result) => {
                    limiter.increment(provider.name(), Service::Ocr).await;
                    info!("ocr served by {}", provider.name());
                    return Ok(result);
                }
                Err(e) => {
                    warn!("{} ocr failed: {}", provider.name(), e);
                    last_failure = Some((provider.name(), e.to_string()));
                }
            }
        }

        Err(exhausted(last_failure, max_retry_after))
    }

    pub async fn run_generation(
        &self,
        limiter: &RateLimitGuard,
        request: &GenerationRequest,
    ) -> Result<Completion, ChainError> {
        if self.llm.is_empty() {
            return Err(ChainError::Empty { service: "generation" });
        }

        let mut max_retry_after: Option<u64> = None;
        let mut last_failure: Option<(&'static str, String)> = None;

        for provider in &self.llm {
            let decision = limiter.check(provider.name(), Service::Generation).await;
            if !decision.allowed {
                note_denied(&mut max_retry_after, decision.retry_after_seconds, provider.name());
                continue;
            }
            match provider.generate(request).await {
                Ok(result) => {
                    limiter.increment(provider.name(), Service::Generation).await;
                    info!("generation served by {}", provider.name());
                    return Ok(result);
                }
                Err(e) => {
                    warn!("{} generation failed: {}", provider.name(), e);
                    last_failure = Some((provider.name(), e.to_string()));
                }
            }
        }

        Err(exhausted(last_failure, max_retry_after))
    }
}

fn note_denied(max_retry_after: &mut Option<u64>, retry_after: Option<u64>, provider: &str) {
    let window = retry_after.unwrap_or(60);
    info!("{} denied by rate limiter, {}s left in window", provider, window);
    *max_retry_after = Some(max_retry_after.map_or(window, |m| m.max(window)));
}

/// Exhausting the chain names the last real failure; if nobody was even
/// invoked the outcome is a pure rate-limit with the largest retry window.
fn exhausted(
    last_failure: Option<(&'static str, String)>,
    max_retry_after: Option<u64>,
) -> ChainError {
    match (last_failure, max_retry_after) {
        (Some((provider, message)), _) => ChainError::Exhausted { provider, message },
        (None, Some(retry_after)) => ChainError::AllRateLimited { retry_after },
        // Unreachable for non-empty chains, kept total for safety.
        (None, None) => ChainError::AllRateLimited { retry_after: 60 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_prefers_real_failures_over_rate_limits() {
        let err = exhausted(Some(("groq", "boom".to_string())), Some(30));
        assert!(matches!(err, ChainError::Exhausted { provider: "groq", .. }));
    }

    #[test]
    fn all_denied_reports_largest_window() {
        let mut max = None;
        note_denied(&mut max, Some(10), "a");
        note_denied(&mut max, Some(45), "b");
        note_denied(&mut max, Some(5), "c");
        let err = exhausted(None, max);
        match err {
            ChainError::AllRateLimited { retry_after } => assert_eq!(retry_after, 45),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn denied_without_ttl_defaults_to_minute_window() {
        let mut max = None;
        note_denied(&mut max, None, "a");
        assert_eq!(max, Some(60));
    }
}
