// src/limiter/mod.rs
// Per-(provider, service) rate limiting over shared cache-store counters.
//
// Counters are fixed windows (minute / day) kept as plain INCR+EXPIRE keys so
// the server and worker processes see the same quota state. If the cache
// store is unreachable the limiter fails open: it protects the provider's
// quota, not correctness.

pub mod policy;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::warn;

pub use policy::{policy_for, RatePolicy, Service, POLICIES};

const MINUTE_TTL: i64 = 60;
const DAY_TTL: i64 = 86_400;
const CREDIT_TTL: i64 = 30 * 86_400;

/// Verdict of a `check` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Remaining TTL of the blocking window, when denied.
    pub retry_after_seconds: Option<u64>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: None,
        }
    }

    fn deny(retry_after: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds: Some(retry_after),
        }
    }
}

/// Live usage snapshot for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RateStatus {
    pub provider: &'static str,
    pub service: Service,
    pub minute_used: u64,
    pub minute_limit: u64,
    pub day_used: u64,
    pub day_limit: u64,
    pub credits_used: Option<f64>,
    pub credit_limit: Option<f64>,
}

pub struct RateLimitGuard {
    conn: ConnectionManager,
}

impl RateLimitGuard {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn minute_key(provider: &str, service: Service) -> String {
        format!("ratelimit:{}:{}:minute", provider, service.as_str())
    }

    fn day_key(provider: &str, service: Service) -> String {
        format!("ratelimit:{}:{}:day", provider, service.as_str())
    }

    fn credits_key(provider: &str, service: Service) -> String {
        format!("ratelimit:{}:{}:credits", provider, service.as_str())
    }

    /// Is a call to (provider, service) currently within quota?
    ///
    /// A pair without a declared policy is always denied: the dispatcher only
    /// routes to known providers, so an unknown pair is a wiring bug.
    pub async fn check(&self, provider: &str, service: Service) -> RateDecision {
        let Some(policy) = policy_for(provider, service) else {
            return RateDecision::deny(MINUTE_TTL as u64);
        };

        let mut conn = self.conn.clone();

        let minute_key = Self::minute_key(provider, service);
        let day_key = Self::day_key(provider, service);

        let counters: Result<(Option<u64>, Option<u64>), redis::RedisError> = redis::pipe()
            .get(&minute_key)
            .get(&day_key)
            .query_async(&mut conn)
            .await;

        let (minute_used, day_used) = match counters {
            Ok((m, d)) => (m.unwrap_or(0), d.unwrap_or(0)),
            Err(e) => {
                warn!("rate counter store unreachable, failing open: {}", e);
                return RateDecision::allow();
            }
        };

        if minute_used >= policy.per_minute {
            let ttl = self.key_ttl(&minute_key, MINUTE_TTL).await;
            return RateDecision::deny(ttl);
        }

        if day_used >= policy.per_day {
            let ttl = self.key_ttl(&day_key, DAY_TTL).await;
            return RateDecision::deny(ttl);
        }

        if let Some(limit) = policy.credit_limit {
            let credits_key = Self::credits_key(provider, service);
            let used: f64 = match conn.get::<_, Option<f64>>(&credits_key).await {
                Ok(v) => v.unwrap_or(0.0),
                Err(e) => {
                    warn!("credit accumulator unreachable, failing open: {}", e);
                    return RateDecision::allow();
                }
            };
            if used >= limit {
                let ttl = self.key_ttl(&credits_key, CREDIT_TTL).await;
                return RateDecision::deny(ttl);
            }
        }

        RateDecision::allow()
    }

    /// Record one successful call. Arms the window TTLs on the first hit.
    pub async fn increment(&self, provider: &str, service: Service) {
        let Some(policy) = policy_for(provider, service) else {
            return;
        };

        let mut conn = self.conn.clone();

        let minute_key = Self::minute_key(provider, service);
        let day_key = Self::day_key(provider, service);

        let result: Result<(u64, u64), redis::RedisError> = redis::pipe()
            .incr(&minute_key, 1u64)
            .incr(&day_key, 1u64)
            .query_async(&mut conn)
            .await;

        match result {
            Ok((minute_val, day_val)) => {
                if minute_val == 1 {
                    let _: Result<(), _> = conn.expire(&minute_key, MINUTE_TTL).await;
                }
                if day_val == 1 {
                    let _: Result<(), _> = conn.expire(&day_key, DAY_TTL).await;
                }
            }
            Err(e) => {
                warn!("failed to bump rate counters for {}: {}", provider, e);
                return;
            }
        }

        if let Some(cost) = policy.estimated_cost_per_request {
            let credits_key = Self::credits_key(provider, service);
            match conn.incr::<_, _, f64>(&credits_key, cost).await {
                Ok(total) => {
                    // First spend in this window arms the 30-day TTL.
                    if (total - cost).abs() < f64::EPSILON {
                        let _: Result<(), _> = conn.expire(&credits_key, CREDIT_TTL).await;
                    }
                }
                Err(e) => warn!("failed to bump credit accumulator: {}", e),
            }
        }
    }

    /// Current usage for one declared policy.
    pub async fn status(&self, policy: &'static RatePolicy) -> RateStatus {
        let mut conn = self.conn.clone();

        let minute_used: u64 = conn
            .get::<_, Option<u64>>(Self::minute_key(policy.provider, policy.service))
            .await
            .ok()
            .flatten()
            .unwrap_or(0);
        let day_used: u64 = conn
            .get::<_, Option<u64>>(Self::day_key(policy.provider, policy.service))
            .await
            .ok()
            .flatten()
            .unwrap_or(0);
        let credits_used = if policy.credit_limit.is_some() {
            conn.get::<_, Option<f64>>(Self::credits_key(policy.provider, policy.service))
                .await
                .ok()
                .flatten()
                .or(Some(0.0))
        } else {
            None
        };

        RateStatus {
            provider: policy.provider,
            service: policy.service,
            minute_used,
            minute_limit: policy.per_minute,
            day_used,
            day_limit: policy.per_day,
            credits_used,
            credit_limit: policy.credit_limit,
        }
    }

    /// Usage for every declared policy, for the status endpoint.
    pub async fn status_all(&self) -> Vec<RateStatus> {
        let mut out = Vec::with_capacity(POLICIES.len());
        for policy in POLICIES {
            out.push(self.status(policy).await);
        }
        out
    }

    /// Drop all counters for one pair.
    pub async fn reset(&self, provider: &str, service: Service) {
        let mut conn = self.conn.clone();
        let keys = vec![
            Self::minute_key(provider, service),
            Self::day_key(provider, service),
            Self::credits_key(provider, service),
        ];
        let _: Result<(), _> = conn.del::<_, ()>(keys).await;
    }

    /// Remaining TTL of a blocking key, clamped to the window size so a
    /// missing TTL never reports longer than the window itself.
    async fn key_ttl(&self, key: &str, window: i64) -> u64 {
        let mut conn = self.conn.clone();
        match conn.ttl::<_, i64>(key).await {
            Ok(ttl) if ttl > 0 => (ttl.min(window)) as u64,
            _ => window as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_stable() {
        // Cross-process coordination depends on both processes deriving the
        // same key strings.
        assert_eq!(
            RateLimitGuard::minute_key("groq", Service::Generation),
            "ratelimit:groq:generation:minute"
        );
        assert_eq!(
            RateLimitGuard::day_key("deepgram", Service::Transcription),
            "ratelimit:deepgram:transcription:day"
        );
        assert_eq!(
            RateLimitGuard::credits_key("assemblyai", Service::Transcription),
            "ratelimit:assemblyai:transcription:credits"
        );
    }

    #[test]
    fn deny_carries_retry_after() {
        let d = RateDecision::deny(42);
        assert!(!d.allowed);
        assert_eq!(d.retry_after_seconds, Some(42));

        let a = RateDecision::allow();
        assert!(a.allowed);
        assert_eq!(a.retry_after_seconds, None);
    }
}
