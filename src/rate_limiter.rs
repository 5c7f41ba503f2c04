//! Sliding-window rate limiting and the IP abuse gate, spec.md §4.9.
//! Built on `VolatileStore`'s sorted-set primitives; both the limiter
//! and the abuse gate fail open on a degraded store, per spec.md §4.3 —
//! availability of the upload/download path matters more than strict
//! enforcement during a store outage.

use crate::config::RateLimitRule;
use crate::event::{Event, EventSink};
use crate::volatile::{VolatileStore, keys};
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Upload,
    Download,
    Auth,
}

impl LimitType {
    fn as_str(self) -> &'static str {
        match self {
            LimitType::Upload => "upload",
            LimitType::Download => "download",
            LimitType::Auth => "auth",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after: u64,
}

pub struct RateLimiter {
    store: Arc<dyn VolatileStore>,
    events: Arc<dyn EventSink>,
    abuse_threshold: u32,
    abuse_window_secs: i64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn VolatileStore>,
        events: Arc<dyn EventSink>,
        abuse_threshold: u32,
        abuse_window_secs: i64,
    ) -> Self {
        Self { store, events, abuse_threshold, abuse_window_secs }
    }

    /// Checks and, if allowed, consumes one slot in `identifier`'s
    /// sliding window for `limit_type`. `identifier` is `"user:<id>"` or
    /// `"ip:<addr>"` per spec.md §4.9.
    pub async fn check(&self, limit_type: LimitType, identifier: &str, rule: &RateLimitRule) -> LimitDecision {
        let key = keys::rate_limit(identifier, limit_type.as_str());
        let now = Utc::now().timestamp_millis() as f64;
        let window_start = now - (rule.window_secs as f64 * 1000.0);

        let result: Result<(u64, Vec<String>), crate::error::Error> = async {
            self.store.zremrangebyscore(&key, 0.0, window_start).await?;
            let count = self.store.zcard(&key).await? as u64;
            let oldest = if count > 0 { self.store.zrange(&key, 0, 0).await? } else { Vec::new() };
            Ok((count, oldest))
        }
        .await;

        let (count, oldest) = match result {
            Ok(value) => value,
            Err(_) => {
                // Fail open: VolatileStore is unreachable.
                return LimitDecision { allowed: true, remaining: rule.limit, retry_after: 0 };
            }
        };

        if count >= rule.limit as u64 {
            let retry_after = oldest
                .first()
                .and_then(|entry| entry.split(':').next())
                .and_then(|ms| ms.parse::<f64>().ok())
                .map(|entry_ms| {
                    let expires_at = entry_ms + rule.window_secs as f64 * 1000.0;
                    ((expires_at - now) / 1000.0).ceil().max(1.0) as u64
                })
                .unwrap_or(rule.window_secs as u64);

            self.events.emit(Event::RateLimited {
                identifier: identifier.to_string(),
                limit_type: limit_type.as_str(),
                retry_after,
            });

            return LimitDecision { allowed: false, remaining: 0, retry_after };
        }

        let member = format!("{now}:{}", uuid::Uuid::new_v4());
        if self.store.zadd(&key, &member, now).await.is_ok() {
            let _ = self.store.expire(&key, std::time::Duration::from_secs(rule.window_secs as u64)).await;
        }

        LimitDecision { allowed: true, remaining: rule.limit - (count as u32) - 1, retry_after: 0 }
    }

    /// Increments `ip`'s abuse counter (path traversal attempts,
    /// repeated chunk validation failures) and reports whether it has
    /// now crossed the threshold. Fails open on a degraded store.
    pub async fn record_abuse(&self, ip: &str) -> bool {
        let key = keys::abuse(ip);
        let now = Utc::now().timestamp_millis() as f64;
        let window_start = now - (self.abuse_window_secs as f64 * 1000.0);

        let result: Result<u64, crate::error::Error> = async {
            self.store.zremrangebyscore(&key, 0.0, window_start).await?;
            let member = format!("{now}:{}", uuid::Uuid::new_v4());
            self.store.zadd(&key, &member, now).await?;
            self.store
                .expire(&key, std::time::Duration::from_secs(self.abuse_window_secs as u64))
                .await?;
            Ok(self.store.zcard(&key).await? as u64)
        }
        .await;

        let Ok(score) = result else {
            return false;
        };

        if score >= self.abuse_threshold as u64 {
            self.events.emit(Event::AbuseBlocked { ip: ip.to_string(), score });
            let _ = self
                .store
                .set(&keys::blacklist(ip), "1", Some(std::time::Duration::from_secs(self.abuse_window_secs as u64)))
                .await;
            true
        } else {
            false
        }
    }

    /// Whether `ip` is currently blocked. Fails open — an unreachable
    /// store never blocks a request that would otherwise be allowed.
    pub async fn is_blocked(&self, ip: &str) -> bool {
        self.store.exists(&keys::blacklist(ip)).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullEventSink;
    use crate::volatile::InMemoryVolatileStore;

    fn harness() -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryVolatileStore::new()), Arc::new(NullEventSink), 100, 3600)
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_denies() {
        let limiter = harness();
        let rule = RateLimitRule { window_secs: 60, limit: 3 };

        for _ in 0..3 {
            let decision = limiter.check(LimitType::Upload, "user:1", &rule).await;
            assert!(decision.allowed);
        }

        let decision = limiter.check(LimitType::Upload, "user:1", &rule).await;
        assert!(!decision.allowed);
        assert!(decision.retry_after >= 1 && decision.retry_after <= 60);
    }

    #[tokio::test]
    async fn separate_identifiers_have_separate_budgets() {
        let limiter = harness();
        let rule = RateLimitRule { window_secs: 60, limit: 1 };

        assert!(limiter.check(LimitType::Download, "user:1", &rule).await.allowed);
        assert!(limiter.check(LimitType::Download, "user:2", &rule).await.allowed);
    }

    #[tokio::test]
    async fn abuse_blocks_after_threshold() {
        let store = Arc::new(InMemoryVolatileStore::new());
        let limiter = RateLimiter::new(store, Arc::new(NullEventSink), 3, 3600);

        assert!(!limiter.record_abuse("1.2.3.4").await);
        assert!(!limiter.record_abuse("1.2.3.4").await);
        assert!(limiter.record_abuse("1.2.3.4").await);
        assert!(limiter.is_blocked("1.2.3.4").await);
    }
}
