// src/queue/mod.rs
// Durable FIFO-with-priority job queues over the shared cache store, with a
// blocking "await result" handle for in-process callers.
//
// The handle resolves through the queue's completion notification channel
// (redis pub/sub fanned into per-job oneshots), not by polling; a one-shot
// read of the stored result covers the subscribe race.

pub mod store;
pub mod worker;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::error::{AppError, AppResult};
use crate::providers::{Completion, ImageDescription, OcrText, Transcript};
use store::QueueStore;

/// How long terminal results stay readable for pending awaits.
const RESULT_TTL_SECS: u64 = 3_600;

/// Default retry budget and backoff seed.
pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 2_000;

/// The four classes of AI work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Audio,
    Image,
    Ocr,
    Llm,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Audio => "audio",
            JobKind::Image => "image",
            JobKind::Ocr => "ocr",
            JobKind::Llm => "llm",
        }
    }

    /// Hard per-job timeout. Exceeding it fails the job terminally.
    pub fn timeout(&self) -> Duration {
        match self {
            JobKind::Audio => Duration::from_secs(120),
            JobKind::Image => Duration::from_secs(60),
            JobKind::Ocr => Duration::from_secs(60),
            JobKind::Llm => Duration::from_secs(90),
        }
    }

    /// Fixed worker-pool width per kind.
    pub fn concurrency(&self) -> usize {
        match self {
            JobKind::Audio => 3,
            JobKind::Image => 5,
            JobKind::Ocr => 5,
            JobKind::Llm => 4,
        }
    }

    pub fn all() -> [JobKind; 4] {
        [JobKind::Audio, JobKind::Image, JobKind::Ocr, JobKind::Llm]
    }
}

/// Dequeue priority. High drains before normal before low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_u8(&self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn all() -> [Priority; 3] {
        [Priority::High, Priority::Normal, Priority::Low]
    }
}

/// Kind-specific work order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Audio {
        audio_url: String,
        language: Option<String>,
    },
    Image {
        image_url: String,
        prompt: Option<String>,
    },
    Ocr {
        image_url: String,
        languages: Vec<String>,
    },
    Llm {
        prompt: String,
        system_prompt: Option<String>,
        max_tokens: u32,
        temperature: f32,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Audio { .. } => JobKind::Audio,
            JobPayload::Image { .. } => JobKind::Image,
            JobPayload::Ocr { .. } => JobKind::Ocr,
            JobPayload::Llm { .. } => JobKind::Llm,
        }
    }
}

/// Result of a completed job, by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutcome {
    Transcript(Transcript),
    Description(ImageDescription),
    OcrText(OcrText),
    Completion(Completion),
}

/// One unit of queued work, serialized into the cache store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub priority: Priority,
    pub payload: JobPayload,
    /// Attempts left including the current one.
    pub attempts_left: u32,
    /// Which attempt this is, 1-based. Drives the backoff exponent.
    pub attempt: u32,
    pub backoff_ms: u64,
    pub timeout_ms: u64,
    pub enqueued_at: chrono::DateTime<Utc>,
}

impl Job {
    /// Delay before the next retry: exponential from the backoff seed.
    pub fn next_retry_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_ms << (self.attempt.saturating_sub(1)))
    }
}

/// Knobs for `enqueue`. Defaults match the dispatcher table.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub attempts: u32,
    pub backoff_ms: u64,
    pub timeout_ms: Option<u64>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            attempts: DEFAULT_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            timeout_ms: None,
        }
    }
}

impl EnqueueOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

/// Terminal record stored and published for every finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResultRecord {
    Completed {
        outcome: JobOutcome,
    },
    Failed {
        error: String,
        rate_limited: bool,
        retry_after: Option<u64>,
    },
}

/// Envelope on the events channel.
#[derive(Debug, Serialize, Deserialize)]
struct JobEvent {
    job_id: String,
    record: JobResultRecord,
}

/// Per-kind queue depth snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub kind: JobKind,
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JobResultRecord>>>>;

/// Opaque handle resolving with the job's terminal result.
pub struct JobHandle {
    pub job_id: String,
    kind: JobKind,
    attempts: u32,
    backoff_ms: u64,
    rx: oneshot::Receiver<JobResultRecord>,
    store: QueueStore,
    pending: PendingMap,
}

impl JobHandle {
    /// Block until the job completes or fails terminally.
    ///
    /// The wait is bounded by the worst case the worker can take: every
    /// attempt running to its timeout plus the backoff gaps, with headroom
    /// for queueing. Abandoning the handle does not cancel the job.
    pub async fn await_result(mut self) -> AppResult<JobOutcome> {
        let per_attempt = self.kind.timeout().as_millis() as u64;
        let backoff_total: u64 = (0..self.attempts).map(|n| self.backoff_ms << n).sum();
        let deadline =
            Duration::from_millis(per_attempt * self.attempts as u64 + backoff_total + 30_000);

        let record = match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(Ok(record)) => record,
            // Listener gone or deadline hit: the result may still have landed.
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().await.remove(&self.job_id);
                match self.store.get_result(&self.job_id).await {
                    Ok(Some(json)) => serde_json::from_str(&json)
                        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?,
                    _ => {
                        return Err(AppError::Provider(format!(
                            "{} job {} produced no result in time",
                            self.kind.as_str(),
                            self.job_id
                        )))
                    }
                }
            }
        };

        match record {
            JobResultRecord::Completed { outcome } => Ok(outcome),
            JobResultRecord::Failed {
                error,
                rate_limited: true,
                retry_after,
            } => {
                debug!("job {} rate limited: {}", self.job_id, error);
                Err(AppError::RateLimited {
                    retry_after: retry_after.unwrap_or(60),
                })
            }
            JobResultRecord::Failed { error, .. } => Err(AppError::Provider(error)),
        }
    }
}

/// The queue facade used by both processes.
pub struct JobQueue {
    store: QueueStore,
    pending: PendingMap,
}

impl JobQueue {
    /// Connect to the cache store and start the completion listener.
    pub async fn connect(cache_store_url: &str) -> Result<Arc<Self>> {
        let client = redis::Client::open(cache_store_url).context("invalid cache store URL")?;
        let conn = redis::aio::ConnectionManager::new(client.clone())
            .await
            .context("cache store unreachable")?;

        let queue = Arc::new(Self {
            store: QueueStore::new(conn),
            pending: Arc::new(Mutex::new(HashMap::new())),
        });

        queue.spawn_completion_listener(client);
        Ok(queue)
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Resolve pending handles as completion events arrive. Reconnects with
    /// a short pause if the subscription drops.
    fn spawn_completion_listener(self: &Arc<Self>, client: redis::Client) {
        let pending = self.pending.clone();
        tokio::spawn(async move {
            loop {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(ps) => ps,
                    Err(e) => {
                        warn!("completion listener cannot subscribe: {}", e);
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        continue;
                    }
                };
                if let Err(e) = pubsub.psubscribe(QueueStore::events_pattern()).await {
                    warn!("completion listener psubscribe failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }

                use futures::StreamExt;
                let mut stream = pubsub.on_message();
                while let Some(message) = stream.next().await {
                    let payload: String = match message.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let event: JobEvent = match serde_json::from_str(&payload) {
                        Ok(e) => e,
                        Err(e) => {
                            warn!("undecodable job event: {}", e);
                            continue;
                        }
                    };
                    if let Some(tx) = pending.lock().await.remove(&event.job_id) {
                        // Receiver may have timed out; that is fine.
                        let _ = tx.send(event.record);
                    }
                }
                warn!("completion listener stream ended, resubscribing");
            }
        });
    }

    /// Queue a unit of work and hand back its await handle.
    pub async fn enqueue(&self, payload: JobPayload, options: EnqueueOptions) -> AppResult<JobHandle> {
        let kind = payload.kind();
        let attempts = options.attempts.max(1);
        let job = Job {
            id: crate::identity::random_id().to_string(),
            kind,
            priority: options.priority,
            payload,
            attempts_left: attempts,
            attempt: 1,
            backoff_ms: options.backoff_ms,
            timeout_ms: options
                .timeout_ms
                .unwrap_or(kind.timeout().as_millis() as u64),
            enqueued_at: Utc::now(),
        };

        let job_json =
            serde_json::to_string(&job).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(job.id.clone(), tx);

        if let Err(e) = self.store.push_wait(kind, job.priority, &job_json).await {
            self.pending.lock().await.remove(&job.id);
            error!("enqueue failed for {} job: {:#}", kind.as_str(), e);
            return Err(AppError::Store(e.to_string()));
        }

        debug!(
            "enqueued {} job {} at priority {}",
            kind.as_str(),
            job.id,
            job.priority.as_u8()
        );

        Ok(JobHandle {
            job_id: job.id,
            kind,
            attempts,
            backoff_ms: job.backoff_ms,
            rx,
            store: self.store.clone(),
            pending: self.pending.clone(),
        })
    }

    pub async fn stats(&self, kind: JobKind) -> AppResult<QueueStats> {
        let (waiting, active, completed, failed, delayed) = self
            .store
            .counts(kind)
            .await
            .map_err(|e| AppError::Store(e.to_string()))?;
        Ok(QueueStats {
            kind,
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    pub async fn stats_all(&self) -> AppResult<Vec<QueueStats>> {
        let mut out = Vec::with_capacity(4);
        for kind in JobKind::all() {
            out.push(self.stats(kind).await?);
        }
        Ok(out)
    }

    /// Drop retained completion/failure entries older than `older_than`.
    pub async fn clean(&self, older_than: Duration) -> AppResult<u64> {
        let cutoff_ms = Utc::now().timestamp_millis() - older_than.as_millis() as i64;
        let mut removed = 0;
        for kind in JobKind::all() {
            removed += self
                .store
                .clean(kind, cutoff_ms)
                .await
                .map_err(|e| AppError::Store(e.to_string()))?;
        }
        Ok(removed)
    }

    /// Used by the worker to publish and persist a terminal record.
    pub(crate) async fn finish_job(&self, job: &Job, record: JobResultRecord) {
        let record_json = match serde_json::to_string(&record) {
            Ok(j) => j,
            Err(e) => {
                error!("unserializable job record for {}: {}", job.id, e);
                return;
            }
        };
        if let Err(e) = self.store.set_result(&job.id, &record_json, RESULT_TTL_SECS).await {
            error!("failed to persist result for {}: {:#}", job.id, e);
        }

        let entry = serde_json::json!({
            "job_id": job.id,
            "kind": job.kind.as_str(),
            "finished_at_ms": Utc::now().timestamp_millis(),
        })
        .to_string();
        let recorded = match record {
            JobResultRecord::Completed { .. } => self.store.record_completed(job.kind, &entry).await,
            JobResultRecord::Failed { .. } => self.store.record_failed(job.kind, &entry).await,
        };
        if let Err(e) = recorded {
            warn!("failed to record job outcome for {}: {:#}", job.id, e);
        }

        let event = JobEvent {
            job_id: job.id.clone(),
            record,
        };
        match serde_json::to_string(&event) {
            Ok(json) => {
                if let Err(e) = self.store.publish(job.kind, &json).await {
                    warn!("failed to publish completion for {}: {:#}", job.id, e);
                }
            }
            Err(e) => error!("unserializable job event for {}: {}", job.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_high_first() {
        assert_eq!(Priority::all().map(|p| p.as_u8()), [1, 2, 3]);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn kind_table_matches_dispatcher_spec() {
        assert_eq!(JobKind::Audio.timeout(), Duration::from_secs(120));
        assert_eq!(JobKind::Image.timeout(), Duration::from_secs(60));
        assert_eq!(JobKind::Ocr.timeout(), Duration::from_secs(60));
        assert_eq!(JobKind::Llm.timeout(), Duration::from_secs(90));

        assert_eq!(JobKind::Audio.concurrency(), 3);
        assert_eq!(JobKind::Image.concurrency(), 5);
        assert_eq!(JobKind::Ocr.concurrency(), 5);
        assert_eq!(JobKind::Llm.concurrency(), 4);
    }

    #[test]
    fn payload_kind_mapping() {
        let p = JobPayload::Llm {
            prompt: "hi".into(),
            system_prompt: None,
            max_tokens: 10,
            temperature: 0.5,
        };
        assert_eq!(p.kind(), JobKind::Llm);

        let p = JobPayload::Ocr {
            image_url: "u".into(),
            languages: vec![],
        };
        assert_eq!(p.kind(), JobKind::Ocr);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let mut job = Job {
            id: "j".into(),
            kind: JobKind::Llm,
            priority: Priority::Normal,
            payload: JobPayload::Llm {
                prompt: "p".into(),
                system_prompt: None,
                max_tokens: 1,
                temperature: 0.0,
            },
            attempts_left: 3,
            attempt: 1,
            backoff_ms: 2_000,
            timeout_ms: 90_000,
            enqueued_at: Utc::now(),
        };
        assert_eq!(job.next_retry_delay(), Duration::from_millis(2_000));
        job.attempt = 2;
        assert_eq!(job.next_retry_delay(), Duration::from_millis(4_000));
        job.attempt = 3;
        assert_eq!(job.next_retry_delay(), Duration::from_millis(8_000));
    }

    #[test]
    fn job_round_trips_through_json() {
        let job = Job {
            id: "abc".into(),
            kind: JobKind::Audio,
            priority: Priority::High,
            payload: JobPayload::Audio {
                audio_url: "http://x/a.ogg".into(),
                language: Some("ar".into()),
            },
            attempts_left: 2,
            attempt: 2,
            backoff_ms: 2_000,
            timeout_ms: 120_000,
            enqueued_at: Utc::now(),
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "abc");
        assert_eq!(back.kind, JobKind::Audio);
        assert_eq!(back.priority, Priority::High);
        match back.payload {
            JobPayload::Audio { audio_url, language } => {
                assert_eq!(audio_url, "http://x/a.ogg");
                assert_eq!(language.as_deref(), Some("ar"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn result_record_round_trips() {
        let record = JobResultRecord::Failed {
            error: "all providers rate limited".into(),
            rate_limited: true,
            retry_after: Some(42),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: JobResultRecord = serde_json::from_str(&json).unwrap();
        match back {
            JobResultRecord::Failed {
                rate_limited,
                retry_after,
                ..
            } => {
                assert!(rate_limited);
                assert_eq!(retry_after, Some(42));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}
