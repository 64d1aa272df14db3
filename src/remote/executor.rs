//! Rate-aware request executor
//!
//! Single chokepoint for every remote call. Applies, in order:
//! 1. a minimum interval between requests shared by all callers
//! 2. classification of the response (success, retryable, terminal)
//! 3. exponential backoff for transport failures
//! 4. reset-aware sleeps for rate-limit signals
//!
//! Batches call [`RequestExecutor::ensure_capacity`] first so they pause
//! before the budget runs out rather than after.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::rate_limit::{RATE_LIMIT_QUERY, RateLimitMemo, RateLimitSnapshot};
use super::transport::{GraphQlRequest, GraphTransport, RawResponse};
use crate::config::ExecutorConfig;
use crate::error::AppError;

/// What one attempt produced
enum Attempt {
    Done(serde_json::Value),
    Retry {
        error: AppError,
        rate_limited: bool,
        reset_at: Option<DateTime<Utc>>,
    },
    Fail(AppError),
}

/// Throttling, retrying GraphQL executor
pub struct RequestExecutor {
    transport: Arc<dyn GraphTransport>,
    config: ExecutorConfig,
    /// When the previous request left; held across the throttle sleep
    last_request: Mutex<Option<Instant>>,
    rate_limit: RateLimitMemo,
}

impl RequestExecutor {
    /// Create new executor
    pub fn new(transport: Arc<dyn GraphTransport>, config: ExecutorConfig) -> Self {
        let rate_limit = RateLimitMemo::new(config.snapshot_ttl());
        Self {
            transport,
            config,
            last_request: Mutex::new(None),
            rate_limit,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Memoized rate-limit view
    pub fn rate_limit(&self) -> &RateLimitMemo {
        &self.rate_limit
    }

    /// Execute a query and return its `data` object
    ///
    /// # Errors
    /// - Transient failures once `max_attempts` is exhausted
    /// - GraphQL errors and non-retryable statuses immediately
    pub async fn execute(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        use crate::metrics::{
            REMOTE_REQUEST_DURATION_SECONDS, REMOTE_REQUESTS_TOTAL, REMOTE_RETRIES_TOTAL,
        };

        let request = GraphQlRequest::new(query, variables);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.throttle().await;
            tracing::debug!(attempt, variables = %request.variables, "Executing GraphQL request");

            let started = std::time::Instant::now();
            let outcome = match self.transport.send(&request).await {
                Ok(raw) => {
                    self.rate_limit
                        .observe_headers(raw.rate_limit_remaining, raw.rate_limit_reset)
                        .await;
                    classify(raw)
                }
                Err(error) if error.is_transient() => Attempt::Retry {
                    error,
                    rate_limited: false,
                    reset_at: None,
                },
                Err(error) => Attempt::Fail(error),
            };
            REMOTE_REQUEST_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

            match outcome {
                Attempt::Done(data) => {
                    REMOTE_REQUESTS_TOTAL.with_label_values(&["success"]).inc();
                    return Ok(data);
                }
                Attempt::Fail(error) => {
                    REMOTE_REQUESTS_TOTAL.with_label_values(&["failed"]).inc();
                    tracing::error!(%error, "GraphQL request failed");
                    return Err(error);
                }
                Attempt::Retry {
                    error,
                    rate_limited,
                    reset_at,
                } => {
                    if attempt >= max_attempts {
                        REMOTE_REQUESTS_TOTAL.with_label_values(&["exhausted"]).inc();
                        tracing::error!(%error, attempts = attempt, "Giving up after retries");
                        return Err(error);
                    }

                    let (reason, wait) = if rate_limited {
                        ("rate_limited", self.rate_limit_wait(reset_at, attempt).await)
                    } else {
                        ("transient", self.backoff(attempt))
                    };
                    REMOTE_RETRIES_TOTAL.with_label_values(&[reason]).inc();
                    tracing::warn!(
                        %error,
                        attempt,
                        reason,
                        wait_ms = wait.as_millis() as u64,
                        "Retrying GraphQL request"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Current rate-limit snapshot, from the memo when fresh
    pub async fn rate_limit_status(&self) -> Result<RateLimitSnapshot, AppError> {
        if let Some(snapshot) = self.rate_limit.fresh().await {
            return Ok(snapshot);
        }

        let data = self.execute(RATE_LIMIT_QUERY, serde_json::json!({})).await?;
        let snapshot: RateLimitSnapshot = serde_json::from_value(data["rateLimit"].clone())
            .map_err(|e| AppError::Decode(format!("rateLimit: {e}")))?;
        tracing::info!(
            remaining = snapshot.remaining,
            reset_at = %snapshot.reset_at,
            "Rate limit status"
        );
        self.rate_limit.store(snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Pause before a batch if the remaining budget is below the threshold
    ///
    /// Returns how long it slept. Failure to read the budget is logged and
    /// treated as "enough capacity".
    pub async fn ensure_capacity(&self) -> Duration {
        let snapshot = match self.rate_limit_status().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(%error, "Could not read rate limit; proceeding");
                return Duration::ZERO;
            }
        };

        if !snapshot.is_below(self.config.rate_limit_threshold) {
            return Duration::ZERO;
        }

        let wait = snapshot.wait_until_reset(Utc::now(), self.config.max_rate_limit_wait());
        tracing::warn!(
            remaining = snapshot.remaining,
            threshold = self.config.rate_limit_threshold,
            reset_at = %snapshot.reset_at,
            wait_ms = wait.as_millis() as u64,
            "Approaching rate limit; pausing before batch"
        );
        tokio::time::sleep(wait).await;
        self.rate_limit.invalidate().await;
        wait
    }

    /// Enforce the minimum inter-request interval
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let next_allowed = previous + self.config.min_interval();
            if next_allowed > Instant::now() {
                tokio::time::sleep_until(next_allowed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// `base * 2^(attempt - 1)`
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.config.backoff_base().saturating_mul(1u32 << exponent)
    }

    /// Sleep length for a rate-limit signal
    ///
    /// Prefers the reset from the response, then the memoized snapshot,
    /// then plain backoff; always capped.
    async fn rate_limit_wait(&self, reset_at: Option<DateTime<Utc>>, attempt: u32) -> Duration {
        let cap = self.config.max_rate_limit_wait();
        let reset_at = match reset_at {
            Some(reset_at) => Some(reset_at),
            None => self.rate_limit.fresh().await.map(|s| s.reset_at),
        };

        match reset_at {
            Some(reset_at) => {
                let wait = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                if wait.is_zero() {
                    self.backoff(attempt).min(cap)
                } else {
                    wait.min(cap)
                }
            }
            None => self.backoff(attempt).min(cap),
        }
    }
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("rate limit") || lower.contains("ratelimit")
}

/// Turn a raw response into the next step of the retry loop
fn classify(raw: RawResponse) -> Attempt {
    let status = raw.status;

    if status == http::StatusCode::FORBIDDEN || status == http::StatusCode::TOO_MANY_REQUESTS {
        let suspected = status == http::StatusCode::TOO_MANY_REQUESTS
            || raw.rate_limit_remaining == Some(0)
            || mentions_rate_limit(&raw.body);
        if suspected {
            return Attempt::Retry {
                error: AppError::RateLimited(format!("HTTP {}", status.as_u16())),
                rate_limited: true,
                reset_at: raw.rate_limit_reset,
            };
        }
        return Attempt::Fail(AppError::RemoteStatus {
            status: status.as_u16(),
            message: "Forbidden: check token permissions".to_string(),
        });
    }

    if !status.is_success() {
        let error = AppError::RemoteStatus {
            status: status.as_u16(),
            message: raw.body.chars().take(200).collect(),
        };
        return if error.is_transient() {
            Attempt::Retry {
                error,
                rate_limited: false,
                reset_at: None,
            }
        } else {
            Attempt::Fail(error)
        };
    }

    let body: serde_json::Value = match serde_json::from_str(&raw.body) {
        Ok(body) => body,
        Err(e) => return Attempt::Fail(AppError::Decode(format!("invalid JSON body: {e}"))),
    };

    let data = body.get("data").cloned().unwrap_or(serde_json::Value::Null);
    let errors = body
        .get("errors")
        .and_then(|errors| errors.as_array())
        .filter(|errors| !errors.is_empty());

    let Some(errors) = errors else {
        return Attempt::Done(data);
    };

    let messages = errors
        .iter()
        .map(|error| {
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
        })
        .collect::<Vec<_>>()
        .join("; ");

    let rate_limited = errors.iter().any(|error| {
        error.get("type").and_then(|t| t.as_str()) == Some("RATE_LIMITED")
    }) || mentions_rate_limit(&messages);
    if rate_limited {
        return Attempt::Retry {
            error: AppError::RateLimited(messages),
            rate_limited: true,
            reset_at: raw.rate_limit_reset,
        };
    }

    // Aliased lookups report unknown logins as NOT_FOUND next to partial data
    let only_not_found = errors
        .iter()
        .all(|error| error.get("type").and_then(|t| t.as_str()) == Some("NOT_FOUND"));
    if only_not_found && data.is_object() {
        tracing::debug!(%messages, "Partial data with NOT_FOUND errors");
        return Attempt::Done(data);
    }

    Attempt::Fail(AppError::GraphQl(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::transport::MockGraphTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            min_interval_ms: 0,
            rate_limit_threshold: 100,
            max_attempts: 3,
            backoff_base_ms: 1000,
            max_rate_limit_wait_secs: 60,
            snapshot_ttl_secs: 60,
        }
    }

    fn executor(mock: MockGraphTransport, config: ExecutorConfig) -> RequestExecutor {
        RequestExecutor::new(Arc::new(mock), config)
    }

    fn status(code: u16, body: &str) -> RawResponse {
        RawResponse {
            status: http::StatusCode::from_u16(code).unwrap(),
            rate_limit_remaining: None,
            rate_limit_reset: None,
            body: body.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mock = MockGraphTransport::new();
        mock.expect_send().times(3).returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(AppError::RemoteStatus {
                    status: 502,
                    message: "bad gateway".to_string(),
                }),
                1 => Ok(status(503, "unavailable")),
                _ => Ok(RawResponse::ok(r#"{"data": {"viewer": {"login": "me"}}}"#)),
            }
        });

        let started = Instant::now();
        let data = executor(mock, config())
            .execute("query { viewer { login } }", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(data["viewer"]["login"], "me");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s then 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_last_error() {
        let mut mock = MockGraphTransport::new();
        mock.expect_send()
            .times(3)
            .returning(|_| Ok(status(502, "bad gateway")));

        let error = executor(mock, config())
            .execute("query { viewer { login } }", serde_json::json!({}))
            .await
            .expect_err("three 502s must fail");

        assert!(matches!(error, AppError::RemoteStatus { status: 502, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn graphql_errors_are_not_retried() {
        let mut mock = MockGraphTransport::new();
        mock.expect_send().times(1).returning(|_| {
            Ok(RawResponse::ok(
                r#"{"errors": [{"message": "Field 'nope' doesn't exist on type 'User'"}]}"#,
            ))
        });

        let error = executor(mock, config())
            .execute("query { viewer { nope } }", serde_json::json!({}))
            .await
            .expect_err("query errors are permanent");

        assert!(matches!(error, AppError::GraphQl(message) if message.contains("nope")));
    }

    #[tokio::test(start_paused = true)]
    async fn graphql_rate_limit_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mock = MockGraphTransport::new();
        mock.expect_send().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(RawResponse::ok(
                    r#"{"errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded"}]}"#,
                ))
            } else {
                Ok(RawResponse::ok(r#"{"data": {"ok": true}}"#))
            }
        });

        let data = executor(mock, config())
            .execute("query { ok }", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(data["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_rate_limit_waits_for_reset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mock = MockGraphTransport::new();
        mock.expect_send().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(RawResponse {
                    status: http::StatusCode::FORBIDDEN,
                    rate_limit_remaining: Some(0),
                    rate_limit_reset: Some(Utc::now() + chrono::Duration::seconds(20)),
                    body: r#"{"message": "API rate limit exceeded"}"#.to_string(),
                })
            } else {
                Ok(RawResponse::ok(r#"{"data": {}}"#))
            }
        });

        let started = Instant::now();
        executor(mock, config())
            .execute("query { ok }", serde_json::json!({}))
            .await
            .unwrap();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(19), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(21), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_without_rate_limit_signal_is_terminal() {
        let mut mock = MockGraphTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(status(403, r#"{"message": "Resource not accessible"}"#)));

        let error = executor(mock, config())
            .execute("query { ok }", serde_json::json!({}))
            .await
            .expect_err("plain 403 is permanent");
        assert!(matches!(error, AppError::RemoteStatus { status: 403, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_errors_keep_partial_data() {
        let mut mock = MockGraphTransport::new();
        mock.expect_send().times(1).returning(|_| {
            Ok(RawResponse::ok(
                r#"{"data": {"user_0": {"login": "a"}, "user_1": null},
                    "errors": [{"type": "NOT_FOUND", "message": "Could not resolve to a User"}]}"#,
            ))
        });

        let data = executor(mock, config())
            .execute("query { ok }", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(data["user_0"]["login"], "a");
        assert!(data["user_1"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_respect_minimum_interval() {
        let mut mock = MockGraphTransport::new();
        mock.expect_send()
            .times(3)
            .returning(|_| Ok(RawResponse::ok(r#"{"data": {}}"#)));

        let executor = executor(
            mock,
            ExecutorConfig {
                min_interval_ms: 100,
                ..config()
            },
        );

        let started = Instant::now();
        for _ in 0..3 {
            executor.execute("query { ok }", serde_json::json!({})).await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn low_remaining_budget_pauses_before_batch() {
        let mut mock = MockGraphTransport::new();
        mock.expect_send().times(0);

        let executor = executor(mock, config());
        executor
            .rate_limit()
            .store(RateLimitSnapshot {
                limit: Some(5000),
                remaining: 50,
                reset_at: Utc::now() + chrono::Duration::seconds(30),
            })
            .await;

        let started = Instant::now();
        let slept = executor.ensure_capacity().await;

        assert!(slept >= Duration::from_secs(29));
        assert!(started.elapsed() >= Duration::from_secs(29));
        assert!(executor.rate_limit().fresh().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_budget_does_not_pause() {
        let mut mock = MockGraphTransport::new();
        mock.expect_send().times(1).returning(|_| {
            Ok(RawResponse::ok(
                r#"{"data": {"rateLimit": {"limit": 5000, "cost": 1, "remaining": 4000, "resetAt": "2030-01-01T00:00:00Z"}}}"#,
            ))
        });

        let executor = executor(mock, config());
        assert_eq!(executor.ensure_capacity().await, Duration::ZERO);
        // memoized: a second check does not hit the transport
        assert_eq!(executor.ensure_capacity().await, Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_from_base() {
        let executor = executor(MockGraphTransport::new(), config());
        assert_eq!(executor.backoff(1), Duration::from_secs(1));
        assert_eq!(executor.backoff(2), Duration::from_secs(2));
        assert_eq!(executor.backoff(3), Duration::from_secs(4));
    }
}
