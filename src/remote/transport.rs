//! GraphQL transport
//!
//! The only place that touches the network. Everything above talks to a
//! `GraphTransport`, which keeps the executor testable without a server.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::config::GitHubConfig;
use crate::error::AppError;

/// GraphQL request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQlRequest {
    pub query: String,
    pub variables: serde_json::Value,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>, variables: serde_json::Value) -> Self {
        Self {
            query: query.into(),
            variables,
        }
    }
}

/// Undecoded HTTP response plus the rate-limit headers the executor needs
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: http::StatusCode,
    /// `x-ratelimit-remaining`
    pub rate_limit_remaining: Option<u32>,
    /// `x-ratelimit-reset`, or now + `retry-after`
    pub rate_limit_reset: Option<DateTime<Utc>>,
    pub body: String,
}

impl RawResponse {
    /// Plain 200 response, mostly for tests
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: http::StatusCode::OK,
            rate_limit_remaining: None,
            rate_limit_reset: None,
            body: body.into(),
        }
    }
}

/// Sends one GraphQL request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphTransport: Send + Sync {
    /// Send the request and return the raw response
    ///
    /// # Errors
    /// `AppError::HttpClient` for connection failures and timeouts
    async fn send(&self, request: &GraphQlRequest) -> Result<RawResponse, AppError>;
}

/// `reqwest`-backed transport with bearer authentication
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
    token: String,
}

impl HttpTransport {
    /// Build the HTTP client from configuration
    pub fn new(config: &GitHubConfig) -> Result<Self, AppError> {
        let endpoint = url::Url::parse(&config.api_url)
            .map_err(|e| AppError::Config(format!("github.api_url is not a valid URL: {e}")))?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl GraphTransport for HttpTransport {
    async fn send(&self, request: &GraphQlRequest) -> Result<RawResponse, AppError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers();
        let rate_limit_remaining = header_u64(headers, "x-ratelimit-remaining").map(|v| v as u32);
        let rate_limit_reset = header_u64(headers, "x-ratelimit-reset")
            .and_then(|epoch| Utc.timestamp_opt(epoch as i64, 0).single())
            .or_else(|| {
                header_u64(headers, "retry-after")
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64))
            });

        let body = response.text().await?;

        Ok(RawResponse {
            status,
            rate_limit_remaining,
            rate_limit_reset,
            body,
        })
    }
}

fn header_u64(headers: &http::HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
