// src/main.rs
// Majlis gateway entry point: the `serve` subcommand runs the HTTP server,
// `work` runs the queue-draining worker. The two run as sibling processes
// coordinating through the shared cache store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use majlis::api::build_router;
use majlis::config::Config;
use majlis::limiter::RateLimitGuard;
use majlis::media::MediaFetcher;
use majlis::providers::chain::ProviderChains;
use majlis::queue::{worker::spawn_workers, JobQueue};
use majlis::state::AppState;

#[derive(Parser)]
#[command(name = "majlis")]
#[command(about = "Context-aware conversational AI gateway for chat rooms")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (ingress + synchronous orchestration)
    Serve,
    /// Run the dispatcher worker (queue drainer)
    Work,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::from_env();

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,
        Commands::Work => run_worker(config).await,
    };

    if let Err(e) = result {
        error!("initialisation failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_server(config: Config) -> Result<()> {
    let bind_address = config.bind_address();
    let state = AppState::initialize(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!("server listening on http://{bind_address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn run_worker(config: Config) -> Result<()> {
    let media = Arc::new(MediaFetcher::new(
        &config.sender_backend_url,
        config.sender_backend_media_exception_token.clone(),
        config.sender_backend_media_exception_query.clone(),
    ));
    let chains = Arc::new(ProviderChains::from_config(&config, media));

    let queue = JobQueue::connect(&config.cache_store_url)
        .await
        .context("queue connection failed")?;

    let redis_client =
        redis::Client::open(config.cache_store_url.as_str()).context("invalid cache URL")?;
    let limiter_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("limiter connection failed")?;
    let limiter = Arc::new(RateLimitGuard::new(limiter_conn));

    info!(
        "worker starting with providers {:?}",
        config.configured_providers()
    );
    let handles = spawn_workers(queue, chains, limiter);

    shutdown_signal().await;
    info!("worker draining, stopping pools");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
