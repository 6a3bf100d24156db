// src/queue/worker.rs
// Dispatcher worker pools: one fixed-concurrency pool per job kind, draining
// the queues through the provider chains under the rate limiter.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Job, JobKind, JobOutcome, JobPayload, JobQueue, JobResultRecord};
use crate::limiter::RateLimitGuard;
use crate::providers::chain::{ChainError, ProviderChains};
use crate::providers::DEFAULT_DESCRIBE_PROMPT;

/// Idle pause between empty dequeue rounds.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Heartbeat refresh cadence for running jobs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Stalled-reaper cadence.
const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the full dispatcher: one pool per kind plus its reaper.
pub fn spawn_workers(
    queue: Arc<JobQueue>,
    chains: Arc<ProviderChains>,
    limiter: Arc<RateLimitGuard>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(JobKind::all().len() * 2);
    for kind in JobKind::all() {
        handles.push(spawn_pool(kind, queue.clone(), chains.clone(), limiter.clone()));
        handles.push(spawn_reaper(kind, queue.clone()));
    }
    handles
}

fn spawn_pool(
    kind: JobKind,
    queue: Arc<JobQueue>,
    chains: Arc<ProviderChains>,
    limiter: Arc<RateLimitGuard>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(kind.concurrency()));
        info!(
            "worker pool for {} started, concurrency {}",
            kind.as_str(),
            kind.concurrency()
        );

        loop {
            promote_due(&queue, kind).await;

            // Take a slot before popping so a full pool never strands a
            // popped job in memory.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            let job_json = match queue.store().pop_wait(kind).await {
                Ok(Some(json)) => json,
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
                Err(e) => {
                    drop(permit);
                    warn!("{} dequeue failed: {:#}", kind.as_str(), e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let job: Job = match serde_json::from_str(&job_json) {
                Ok(job) => job,
                Err(e) => {
                    drop(permit);
                    error!("dropping undecodable {} job: {}", kind.as_str(), e);
                    continue;
                }
            };

            let queue = queue.clone();
            let chains = chains.clone();
            let limiter = limiter.clone();
            tokio::spawn(async move {
                process_job(queue, chains, limiter, job, job_json).await;
                drop(permit);
            });
        }
    })
}

/// Move delayed retries whose backoff has elapsed back onto the wait lists.
async fn promote_due(queue: &Arc<JobQueue>, kind: JobKind) {
    let now_ms = Utc::now().timestamp_millis();
    match queue.store().due_delayed(kind, now_ms).await {
        Ok(due) => {
            for job_json in due {
                let priority = serde_json::from_str::<Job>(&job_json)
                    .map(|j| j.priority)
                    .unwrap_or_default();
                if let Err(e) = queue.store().push_wait(kind, priority, &job_json).await {
                    error!("failed to promote delayed {} job: {:#}", kind.as_str(), e);
                }
            }
        }
        Err(e) => warn!("delayed promotion failed for {}: {:#}", kind.as_str(), e),
    }
}

/// Return active jobs whose worker stopped heartbeating to the waiting set.
fn spawn_reaper(kind: JobKind, queue: Arc<JobQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(REAP_INTERVAL).await;
            let cutoff_ms =
                Utc::now().timestamp_millis() - 2 * kind.timeout().as_millis() as i64;
            match queue.store().reap_stalled(kind, cutoff_ms).await {
                Ok(stalled) if !stalled.is_empty() => {
                    warn!("requeueing {} stalled {} jobs", stalled.len(), kind.as_str());
                    for job_json in stalled {
                        let priority = serde_json::from_str::<Job>(&job_json)
                            .map(|j| j.priority)
                            .unwrap_or_default();
                        if let Err(e) = queue.store().push_wait(kind, priority, &job_json).await {
                            error!("failed to requeue stalled job: {:#}", e);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("stalled reaper failed for {}: {:#}", kind.as_str(), e),
            }
        }
    })
}

async fn process_job(
    queue: Arc<JobQueue>,
    chains: Arc<ProviderChains>,
    limiter: Arc<RateLimitGuard>,
    job: Job,
    job_json: String,
) {
    let kind = job.kind;
    let now_ms = Utc::now().timestamp_millis();
    if let Err(e) = queue.store().set_active(kind, &job.id, &job_json, now_ms).await {
        warn!("failed to mark {} active: {:#}", job.id, e);
    }

    // Keep the heartbeat fresh while the job runs so the reaper leaves it be.
    let hb_store = queue.store().clone();
    let hb_id = job.id.clone();
    let heartbeat = tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            let _ = hb_store
                .heartbeat(kind, &hb_id, Utc::now().timestamp_millis())
                .await;
        }
    });

    let timeout = Duration::from_millis(job.timeout_ms);
    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(timeout, execute(&chains, &limiter, &job.payload)).await;

    heartbeat.abort();
    if let Err(e) = queue.store().clear_active(kind, &job.id).await {
        warn!("failed to clear active flag for {}: {:#}", job.id, e);
    }

    match outcome {
        Ok(Ok(result)) => {
            debug!(
                "{} job {} completed in {}ms (attempt {})",
                kind.as_str(),
                job.id,
                started.elapsed().as_millis(),
                job.attempt
            );
            queue
                .finish_job(&job, JobResultRecord::Completed { outcome: result })
                .await;
        }
        Ok(Err(chain_error)) => handle_chain_failure(&queue, job, chain_error).await,
        Err(_) => {
            // A hard timeout is terminal regardless of attempts remaining.
            warn!(
                "{} job {} exceeded its {}ms timeout",
                kind.as_str(),
                job.id,
                job.timeout_ms
            );
            queue
                .finish_job(
                    &job,
                    JobResultRecord::Failed {
                        error: format!(
                            "{} job timed out after {}ms",
                            kind.as_str(),
                            job.timeout_ms
                        ),
                        rate_limited: false,
                        retry_after: None,
                    },
                )
                .await;
        }
    }
}

/// Retry with backoff while attempts remain; otherwise fail terminally.
async fn handle_chain_failure(queue: &Arc<JobQueue>, mut job: Job, chain_error: ChainError) {
    let retryable = !matches!(chain_error, ChainError::Empty { .. });

    if retryable && job.attempts_left > 1 {
        let delay = job.next_retry_delay();
        job.attempts_left -= 1;
        job.attempt += 1;
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        info!(
            "{} job {} retrying in {}ms ({} attempts left): {}",
            job.kind.as_str(),
            job.id,
            delay.as_millis(),
            job.attempts_left,
            chain_error
        );
        match serde_json::to_string(&job) {
            Ok(json) => {
                if let Err(e) = queue.store().add_delayed(job.kind, ready_at, &json).await {
                    error!("failed to schedule retry for {}: {:#}", job.id, e);
                    fail_terminally(queue, &job, chain_error).await;
                }
            }
            Err(e) => {
                error!("unserializable retry job {}: {}", job.id, e);
                fail_terminally(queue, &job, chain_error).await;
            }
        }
        return;
    }

    fail_terminally(queue, &job, chain_error).await;
}

async fn fail_terminally(queue: &Arc<JobQueue>, job: &Job, chain_error: ChainError) {
    let (rate_limited, retry_after) = match &chain_error {
        ChainError::AllRateLimited { retry_after } => (true, Some(*retry_after)),
        _ => (false, None),
    };
    warn!(
        "{} job {} failed terminally: {}",
        job.kind.as_str(),
        job.id,
        chain_error
    );
    queue
        .finish_job(
            job,
            JobResultRecord::Failed {
                error: chain_error.to_string(),
                rate_limited,
                retry_after,
            },
        )
        .await;
}

/// Run one payload through its provider chain.
async fn execute(
    chains: &ProviderChains,
    limiter: &RateLimitGuard,
    payload: &JobPayload,
) -> Result<JobOutcome, ChainError> {
    match payload {
        JobPayload::Audio { audio_url, language } => chains
            .run_transcription(limiter, audio_url, language.as_deref())
            .await
            .map(JobOutcome::Transcript),
        JobPayload::Image { image_url, prompt } => chains
            .run_description(
                limiter,
                image_url,
                prompt.as_deref().unwrap_or(DEFAULT_DESCRIBE_PROMPT),
            )
            .await
            .map(JobOutcome::Description),
        JobPayload::Ocr { image_url, languages } => chains
            .run_ocr(limiter, image_url, languages)
            .await
            .map(JobOutcome::OcrText),
        JobPayload::Llm {
            prompt,
            system_prompt,
            max_tokens,
            temperature,
        } => chains
            .run_generation(
                limiter,
                &crate::providers::GenerationRequest {
                    prompt: prompt.clone(),
                    system_prompt: system_prompt.clone(),
                    max_tokens: *max_tokens,
                    temperature: *temperature,
                },
            )
            .await
            .map(JobOutcome::Completion),
    }
}
