// src/state.rs
// Shared application state wired once at startup

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::chat::history::ChatHistoryStore;
use crate::chat::ChatService;
use crate::config::Config;
use crate::context::ContextAssembler;
use crate::embedding::{SidecarEmbedder, TextEmbedder};
use crate::ingest::IngestService;
use crate::limiter::RateLimitGuard;
use crate::media::MediaFetcher;
use crate::queue::JobQueue;
use crate::summary::SummaryService;
use crate::vector::{AuthoritativeStore, DualMessageStore, ShadowStore};

pub struct AppState {
    pub config: Config,
    pub queue: Arc<JobQueue>,
    pub limiter: Arc<RateLimitGuard>,
    pub embedder: Arc<SidecarEmbedder>,
    pub authoritative: Arc<AuthoritativeStore>,
    pub shadow: Arc<ShadowStore>,
    pub messages: Arc<DualMessageStore>,
    pub summaries: Arc<SummaryService>,
    pub history: Arc<ChatHistoryStore>,
    pub ingest: Arc<IngestService>,
    pub chat: Arc<ChatService>,
    pub media: Arc<MediaFetcher>,
}

impl AppState {
    /// Connect every backing service and wire the service graph. Collection
    /// bootstrap runs here so the server is usable as soon as it binds.
    pub async fn initialize(config: Config) -> Result<Arc<Self>> {
        let media = Arc::new(MediaFetcher::new(
            &config.sender_backend_url,
            config.sender_backend_media_exception_token.clone(),
            config.sender_backend_media_exception_query.clone(),
        ));

        let embedder = Arc::new(SidecarEmbedder::new(
            &config.embedding_url,
            &config.embedding_model,
        ));

        let authoritative = Arc::new(AuthoritativeStore::new(
            &config.authoritative_vector_url,
            config.authoritative_vector_api_key.as_deref(),
        )?);
        authoritative
            .bootstrap()
            .await
            .context("authoritative store bootstrap failed")?;

        let shadow = Arc::new(
            ShadowStore::open(&config.db_path, &config.table_name)
                .await
                .context("shadow store bootstrap failed")?,
        );

        let queue = JobQueue::connect(&config.cache_store_url)
            .await
            .context("queue connection failed")?;

        let redis_client =
            redis::Client::open(config.cache_store_url.as_str()).context("invalid cache URL")?;
        let limiter_conn = redis::aio::ConnectionManager::new(redis_client)
            .await
            .context("limiter connection failed")?;
        let limiter = Arc::new(RateLimitGuard::new(limiter_conn));

        let messages = Arc::new(DualMessageStore::new(authoritative.clone(), shadow.clone()));
        let summaries = Arc::new(SummaryService::new(authoritative.clone(), queue.clone()));
        let history = Arc::new(ChatHistoryStore::new(authoritative.clone()));

        let ingest = Arc::new(IngestService::new(
            queue.clone(),
            embedder.clone(),
            messages.clone(),
            summaries.clone(),
            media.clone(),
        ));

        let assembler = Arc::new(ContextAssembler::new(
            summaries.clone(),
            history.clone(),
            messages.clone(),
        ));
        let chat = Arc::new(ChatService::new(assembler, queue.clone(), history.clone()));

        info!(
            "state initialized: providers={:?}, embedding={} ({} dims)",
            config.configured_providers(),
            config.embedding_model,
            embedder.dimensions(),
        );

        Ok(Arc::new(Self {
            config,
            queue,
            limiter,
            embedder,
            authoritative,
            shadow,
            messages,
            summaries,
            history,
            ingest,
            chat,
            media,
        }))
    }
}
