// src/embedding.rs
// Embedding sidecar client (OpenAI-compatible /v1/embeddings endpoint)

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Embedding dimension for the multilingual e5 family. Collection bootstrap,
/// zero-vector constructors and the health endpoint all read this constant.
pub const EMBEDDING_DIM: usize = 384;

/// Max characters to embed (conservative limit for small multilingual models)
const MAX_TEXT_CHARS: usize = 8192;

/// Input prefix required by the e5 model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPrefix {
    /// For search queries.
    Query,
    /// For stored passages.
    Passage,
}

impl EmbedPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedPrefix::Query => "query",
            EmbedPrefix::Passage => "passage",
        }
    }
}

/// A text-to-vector function. The model itself is an external collaborator;
/// callers only see this trait.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str, prefix: EmbedPrefix) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for the embedding inference sidecar.
pub struct SidecarEmbedder {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl SidecarEmbedder {
    pub fn new(base_url: &str, model: &str) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http_client,
        }
    }

    /// Probe the sidecar without embedding anything meaningful.
    pub async fn health_check(&self) -> bool {
        self.embed("ping", EmbedPrefix::Query).await.is_ok()
    }
}

#[async_trait]
impl TextEmbedder for SidecarEmbedder {
    async fn embed(&self, text: &str, prefix: EmbedPrefix) -> Result<Vec<f32>> {
        let prefixed = prefix_input(text, prefix);

        let body = serde_json::json!({
            "input": prefixed,
            "model": self.model,
        });

        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("embedding sidecar unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            anyhow::bail!("embedding request failed ({}): {}", status, body_text);
        }

        let resp: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        let mut vector = resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))?;

        if vector.len() != EMBEDDING_DIM {
            anyhow::bail!(
                "embedding dimension mismatch: expected {}, got {}",
                EMBEDDING_DIM,
                vector.len()
            );
        }

        // Models in the e5 family are trained for cosine similarity;
        // normalise defensively in case the sidecar skips it.
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// `"{prefix}: {text}"` per the e5 input convention, truncated to a char
/// boundary the model can handle.
fn prefix_input(text: &str, prefix: EmbedPrefix) -> String {
    let truncated: String = if text.chars().count() > MAX_TEXT_CHARS {
        debug!("truncating embedding input to {} chars", MAX_TEXT_CHARS);
        text.chars().take(MAX_TEXT_CHARS).collect()
    } else {
        text.to_string()
    };
    format!("{}: {}", prefix.as_str(), truncated)
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// The zero vector stored on aggregates and history records, present only
/// because the store requires one.
pub fn zero_vector() -> Vec<f32> {
    vec![0.0; EMBEDDING_DIM]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_carries_the_prefix() {
        assert_eq!(prefix_input("hello", EmbedPrefix::Query), "query: hello");
        assert_eq!(
            prefix_input("مرحبا", EmbedPrefix::Passage),
            "passage: مرحبا"
        );
    }

    #[test]
    fn long_input_is_truncated_on_char_boundaries() {
        let long = "ع".repeat(MAX_TEXT_CHARS + 100);
        let out = prefix_input(&long, EmbedPrefix::Passage);
        assert_eq!(out.chars().count(), MAX_TEXT_CHARS + "passage: ".chars().count());
    }

    #[test]
    fn normalization_yields_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_survives_normalization() {
        let mut v = zero_vector();
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[test]
    fn zero_vector_matches_collection_dimension() {
        assert_eq!(zero_vector().len(), EMBEDDING_DIM);
    }
}
