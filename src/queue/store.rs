// src/queue/store.rs
// Redis key plumbing for the job queues.
//
// All state both processes share lives under the `bull:` prefix:
//   bull:{kind}:wait:{priority}   lists, LPUSH/RPOP so FIFO holds per level
//   bull:{kind}:active            hash job-id -> job JSON
//   bull:{kind}:heartbeats        hash job-id -> last heartbeat millis
//   bull:{kind}:delayed           zset of job JSON scored by ready-at millis
//   bull:{kind}:completed/failed  capped recency lists for observability
//   bull:result:{job-id}          terminal result JSON with a TTL
//   bull:{kind}:events            pub/sub channel carrying result records

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{JobKind, Priority};

/// Retention caps for the observability lists.
const COMPLETED_KEEP: isize = 100;
const FAILED_KEEP: isize = 500;

#[derive(Clone)]
pub struct QueueStore {
    conn: ConnectionManager,
}

impl QueueStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn wait_key(kind: JobKind, priority: Priority) -> String {
        format!("bull:{}:wait:{}", kind.as_str(), priority.as_u8())
    }

    fn active_key(kind: JobKind) -> String {
        format!("bull:{}:active", kind.as_str())
    }

    fn heartbeats_key(kind: JobKind) -> String {
        format!("bull:{}:heartbeats", kind.as_str())
    }

    fn delayed_key(kind: JobKind) -> String {
        format!("bull:{}:delayed", kind.as_str())
    }

    fn completed_key(kind: JobKind) -> String {
        format!("bull:{}:completed", kind.as_str())
    }

    fn failed_key(kind: JobKind) -> String {
        format!("bull:{}:failed", kind.as_str())
    }

    pub fn result_key(job_id: &str) -> String {
        format!("bull:result:{job_id}")
    }

    pub fn events_channel(kind: JobKind) -> String {
        format!("bull:{}:events", kind.as_str())
    }

    /// Pattern the completion listener subscribes to.
    pub fn events_pattern() -> &'static str {
        "bull:*:events"
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    pub async fn push_wait(&self, kind: JobKind, priority: Priority, job_json: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(Self::wait_key(kind, priority), job_json)
            .await
            .context("failed to enqueue job")
    }

    /// Next waiting job, draining high before normal before low.
    pub async fn pop_wait(&self, kind: JobKind) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        for priority in Priority::all() {
            let popped: Option<String> = conn
                .rpop(Self::wait_key(kind, priority), None)
                .await
                .context("failed to pop waiting job")?;
            if popped.is_some() {
                return Ok(popped);
            }
        }
        Ok(None)
    }

    pub async fn add_delayed(&self, kind: JobKind, ready_at_ms: i64, job_json: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(Self::delayed_key(kind), job_json, ready_at_ms)
            .await
            .context("failed to delay job")
    }

    /// Pop every delayed job whose ready-at has passed.
    pub async fn due_delayed(&self, kind: JobKind, now_ms: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let key = Self::delayed_key(kind);
        let due: Vec<String> = conn
            .zrangebyscore(&key, i64::MIN, now_ms)
            .await
            .context("failed to read delayed set")?;
        for member in &due {
            conn.zrem::<_, _, ()>(&key, member)
                .await
                .context("failed to remove promoted job")?;
        }
        Ok(due)
    }

    pub async fn set_active(
        &self,
        kind: JobKind,
        job_id: &str,
        job_json: &str,
        now_ms: i64,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .hset(Self::active_key(kind), job_id, job_json)
            .hset(Self::heartbeats_key(kind), job_id, now_ms)
            .query_async::<()>(&mut conn)
            .await
            .context("failed to mark job active")
    }

    pub async fn heartbeat(&self, kind: JobKind, job_id: &str, now_ms: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(Self::heartbeats_key(kind), job_id, now_ms)
            .await
            .context("failed to refresh heartbeat")
    }

    pub async fn clear_active(&self, kind: JobKind, job_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .hdel(Self::active_key(kind), job_id)
            .hdel(Self::heartbeats_key(kind), job_id)
            .query_async::<()>(&mut conn)
            .await
            .context("failed to clear active job")
    }

    /// Remove active jobs whose worker stopped heartbeating and hand their
    /// JSON back so the caller can requeue them.
    pub async fn reap_stalled(&self, kind: JobKind, cutoff_ms: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let heartbeats: Vec<(String, i64)> = conn
            .hgetall(Self::heartbeats_key(kind))
            .await
            .context("failed to read heartbeats")?;

        let mut stalled = Vec::new();
        for (job_id, beat) in heartbeats {
            if beat >= cutoff_ms {
                continue;
            }
            let job_json: Option<String> = conn
                .hget(Self::active_key(kind), &job_id)
                .await
                .context("failed to read stalled job")?;
            self.clear_active(kind, &job_id).await?;
            if let Some(json) = job_json {
                stalled.push(json);
            }
        }
        Ok(stalled)
    }

    pub async fn record_completed(&self, kind: JobKind, entry_json: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::completed_key(kind);
        redis::pipe()
            .lpush(&key, entry_json)
            .ltrim(&key, 0, COMPLETED_KEEP - 1)
            .query_async::<()>(&mut conn)
            .await
            .context("failed to record completion")
    }

    pub async fn record_failed(&self, kind: JobKind, entry_json: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::failed_key(kind);
        redis::pipe()
            .lpush(&key, entry_json)
            .ltrim(&key, 0, FAILED_KEEP - 1)
            .query_async::<()>(&mut conn)
            .await
            .context("failed to record failure")
    }

    pub async fn set_result(&self, job_id: &str, record_json: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::result_key(job_id), record_json, ttl_secs)
            .await
            .context("failed to store job result")
    }

    pub async fn get_result(&self, job_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(Self::result_key(job_id))
            .await
            .context("failed to read job result")
    }

    pub async fn publish(&self, kind: JobKind, payload_json: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(Self::events_channel(kind), payload_json)
            .await
            .context("failed to publish job event")
    }

    /// (waiting, active, completed, failed, delayed) for one kind.
    pub async fn counts(&self, kind: JobKind) -> Result<(u64, u64, u64, u64, u64)> {
        let mut conn = self.conn.clone();
        let mut waiting = 0u64;
        for priority in Priority::all() {
            let len: u64 = conn
                .llen(Self::wait_key(kind, priority))
                .await
                .context("failed to read queue length")?;
            waiting += len;
        }
        let active: u64 = conn.hlen(Self::active_key(kind)).await.unwrap_or(0);
        let completed: u64 = conn.llen(Self::completed_key(kind)).await.unwrap_or(0);
        let failed: u64 = conn.llen(Self::failed_key(kind)).await.unwrap_or(0);
        let delayed: u64 = conn.zcard(Self::delayed_key(kind)).await.unwrap_or(0);
        Ok((waiting, active, completed, failed, delayed))
    }

    /// Drop completion/failure entries older than the cutoff. Returns how
    /// many were removed.
    pub async fn clean(&self, kind: JobKind, cutoff_ms: i64) -> Result<u64> {
        let mut removed = 0u64;
        for key in [Self::completed_key(kind), Self::failed_key(kind)] {
            let mut conn = self.conn.clone();
            let entries: Vec<String> = conn.lrange(&key, 0, -1).await.unwrap_or_default();
            let kept: Vec<String> = entries
                .iter()
                .filter(|e| {
                    serde_json::from_str::<serde_json::Value>(e)
                        .ok()
                        .and_then(|v| v.get("finished_at_ms").and_then(|t| t.as_i64()))
                        .map(|t| t >= cutoff_ms)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            removed += (entries.len() - kept.len()) as u64;

            let mut pipe = redis::pipe();
            pipe.del(&key);
            for entry in kept.iter().rev() {
                pipe.lpush(&key, entry);
            }
            pipe.query_async::<()>(&mut conn)
                .await
                .context("failed to rewrite retention list")?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_stable() {
        assert_eq!(
            QueueStore::wait_key(JobKind::Llm, Priority::High),
            "bull:llm:wait:1"
        );
        assert_eq!(QueueStore::active_key(JobKind::Audio), "bull:audio:active");
        assert_eq!(QueueStore::delayed_key(JobKind::Ocr), "bull:ocr:delayed");
        assert_eq!(QueueStore::result_key("abc"), "bull:result:abc");
        assert_eq!(QueueStore::events_channel(JobKind::Image), "bull:image:events");
    }
}
