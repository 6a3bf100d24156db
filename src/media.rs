// src/media.rs
// Media fetch from the sender backend (and plain URLs)

use anyhow::{Context, Result};
use std::time::Duration;

/// Raw media bytes plus the Content-Type the origin reported.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

impl FetchedMedia {
    /// File extension hint for providers that want a filename.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_deref() {
            Some(m) if m.contains("mpeg") || m.contains("mp3") => "mp3",
            Some(m) if m.contains("ogg") => "ogg",
            Some(m) if m.contains("wav") => "wav",
            Some(m) if m.contains("png") => "png",
            Some(m) if m.contains("webp") => "webp",
            Some(m) if m.contains("gif") => "gif",
            Some(m) if m.contains("jpeg") || m.contains("jpg") => "jpg",
            _ => "bin",
        }
    }
}

/// Fetches media referenced by chat messages. Bare keys resolve against the
/// sender backend's media endpoint with its exception token attached.
pub struct MediaFetcher {
    client: reqwest::Client,
    backend_url: String,
    exception_token: Option<String>,
    exception_query: Option<String>,
}

impl MediaFetcher {
    pub fn new(
        backend_url: &str,
        exception_token: Option<String>,
        exception_query: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            exception_token,
            exception_query,
        }
    }

    /// Full URL for a media key on the sender backend.
    pub fn media_url(&self, key: &str) -> String {
        let mut url = format!("{}/api/v1/media/{}", self.backend_url, key);
        let mut sep = '?';
        if let Some(token) = &self.exception_token {
            url.push(sep);
            url.push_str("token=");
            url.push_str(token);
            sep = '&';
        }
        if let Some(eq) = &self.exception_query {
            url.push(sep);
            url.push_str("eq=");
            url.push_str(eq);
        }
        url
    }

    /// Resolve a media reference (absolute URL or bare backend key) to a URL.
    pub fn resolve(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            reference.to_string()
        } else {
            self.media_url(reference)
        }
    }

    /// Download the bytes behind a media URL.
    pub async fn fetch(&self, url: &str) -> Result<FetchedMedia> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch media from {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("media fetch returned {} for {}", response.status(), url);
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .context("failed to read media body")?
            .to_vec();

        Ok(FetchedMedia { bytes, mime })
    }

    /// Fetch a plain-text document and decode it leniently.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let media = self.fetch(url).await?;
        Ok(String::from_utf8_lossy(&media.bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_url_includes_token_and_query() {
        let fetcher = MediaFetcher::new(
            "http://backend:8080/",
            Some("tok".to_string()),
            Some("xyz".to_string()),
        );
        assert_eq!(
            fetcher.media_url("abc123"),
            "http://backend:8080/api/v1/media/abc123?token=tok&eq=xyz"
        );
    }

    #[test]
    fn media_url_without_credentials_is_bare() {
        let fetcher = MediaFetcher::new("http://backend:8080", None, None);
        assert_eq!(
            fetcher.media_url("abc123"),
            "http://backend:8080/api/v1/media/abc123"
        );
    }

    #[test]
    fn resolve_passes_absolute_urls_through() {
        let fetcher = MediaFetcher::new("http://backend:8080", None, None);
        assert_eq!(
            fetcher.resolve("https://cdn.example.com/a.ogg"),
            "https://cdn.example.com/a.ogg"
        );
        assert_eq!(
            fetcher.resolve("key-1"),
            "http://backend:8080/api/v1/media/key-1"
        );
    }

    #[test]
    fn extension_follows_mime() {
        let m = FetchedMedia {
            bytes: vec![],
            mime: Some("audio/ogg; codecs=opus".to_string()),
        };
        assert_eq!(m.extension(), "ogg");

        let unknown = FetchedMedia {
            bytes: vec![],
            mime: None,
        };
        assert_eq!(unknown.extension(), "bin");
    }
}
