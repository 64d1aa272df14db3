//! Rate-limit introspection
//!
//! Keeps a briefly memoized view of the remote budget so a batch can decide
//! to wait before it starts instead of running into a hard failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// GraphQL `rateLimit { limit cost remaining resetAt }` query
pub const RATE_LIMIT_QUERY: &str = r#"
query {
  rateLimit {
    limit
    cost
    remaining
    resetAt
  }
}
"#;

/// Remaining budget and when it refills
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    #[serde(default)]
    pub limit: Option<u32>,
    pub remaining: u32,
    #[serde(rename = "resetAt")]
    pub reset_at: DateTime<Utc>,
}

impl RateLimitSnapshot {
    /// Time left until the reset, capped at `cap` and never negative
    pub fn wait_until_reset(&self, now: DateTime<Utc>, cap: Duration) -> Duration {
        let until_reset = (self.reset_at - now).to_std().unwrap_or(Duration::ZERO);
        until_reset.min(cap)
    }

    pub fn is_below(&self, threshold: u32) -> bool {
        self.remaining < threshold
    }
}

/// Memoized entry
#[derive(Debug, Clone)]
struct MemoEntry {
    snapshot: RateLimitSnapshot,
    observed_at: Instant,
}

/// Process-lifetime memo of the last rate-limit snapshot
///
/// Staleness only makes throttling slightly conservative, so readers take
/// whatever is there and refresh once it is older than the TTL.
pub struct RateLimitMemo {
    entry: RwLock<Option<MemoEntry>>,
    ttl: Duration,
}

impl RateLimitMemo {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// Snapshot if one was observed within the TTL
    pub async fn fresh(&self) -> Option<RateLimitSnapshot> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| e.observed_at.elapsed() < self.ttl)
            .map(|e| e.snapshot.clone())
    }

    /// Record a new observation
    pub async fn store(&self, snapshot: RateLimitSnapshot) {
        crate::metrics::RATE_LIMIT_REMAINING.set(i64::from(snapshot.remaining));
        let mut entry = self.entry.write().await;
        *entry = Some(MemoEntry {
            snapshot,
            observed_at: Instant::now(),
        });
    }

    /// Update from response headers when both values are present
    pub async fn observe_headers(&self, remaining: Option<u32>, reset_at: Option<DateTime<Utc>>) {
        if let (Some(remaining), Some(reset_at)) = (remaining, reset_at) {
            let limit = self.entry.read().await.as_ref().and_then(|e| e.snapshot.limit);
            self.store(RateLimitSnapshot {
                limit,
                remaining,
                reset_at,
            })
            .await;
        }
    }

    /// Forget the memo so the next batch re-fetches
    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_is_capped_and_non_negative() {
        let now = Utc::now();
        let cap = Duration::from_secs(60);

        let soon = RateLimitSnapshot {
            limit: Some(5000),
            remaining: 10,
            reset_at: now + chrono::Duration::seconds(30),
        };
        assert_eq!(soon.wait_until_reset(now, cap), Duration::from_secs(30));

        let late = RateLimitSnapshot {
            reset_at: now + chrono::Duration::minutes(45),
            ..soon.clone()
        };
        assert_eq!(late.wait_until_reset(now, cap), cap);

        let past = RateLimitSnapshot {
            reset_at: now - chrono::Duration::seconds(5),
            ..soon
        };
        assert_eq!(past.wait_until_reset(now, cap), Duration::ZERO);
    }

    #[test]
    fn snapshot_deserializes_from_graphql_shape() {
        let snapshot: RateLimitSnapshot = serde_json::from_str(
            r#"{"limit": 5000, "cost": 1, "remaining": 4999, "resetAt": "2026-10-16T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(snapshot.remaining, 4999);
        assert_eq!(snapshot.limit, Some(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn memo_expires_after_ttl() {
        let memo = RateLimitMemo::new(Duration::from_secs(60));
        memo.store(RateLimitSnapshot {
            limit: None,
            remaining: 50,
            reset_at: Utc::now(),
        })
        .await;
        assert!(memo.fresh().await.is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(memo.fresh().await.is_none());
    }

    #[tokio::test]
    async fn headers_need_both_values() {
        let memo = RateLimitMemo::new(Duration::from_secs(60));
        memo.observe_headers(Some(10), None).await;
        assert!(memo.fresh().await.is_none());

        memo.observe_headers(Some(10), Some(Utc::now())).await;
        assert_eq!(memo.fresh().await.map(|s| s.remaining), Some(10));
    }
}
