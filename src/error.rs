//! Error types for followsync
//!
//! Every failure in the engine is an `AppError`. Callers that need to
//! decide between retrying, reporting, or recovering use
//! [`AppError::class`] instead of matching on individual variants.

use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Connection failure, timeout or other transport-level problem
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Remote API signalled rate limiting and waiting did not help
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Non-success HTTP status that is not a rate-limit signal
    #[error("Remote returned HTTP {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    /// GraphQL error list on an otherwise successful response
    #[error("GraphQL query failed: {0}")]
    GraphQl(String),

    /// Requested owner does not exist remotely
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Mutation attempted on an owner type the current policy rejects
    #[error("Unsupported owner type for {login}: {owner_type}")]
    UnsupportedOwnerType { login: String, owner_type: String },

    /// Response body did not have the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Local cache or list file could not be read or written
    #[error("Local state error: {0}")]
    LocalState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied an invalid argument
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse error taxonomy used for retry and recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connection failures, rate-limit signals. Retried with backoff.
    Transient,
    /// Malformed queries, missing entities, rejected owner types. Never retried.
    Permanent,
    /// Unreadable local files. Recovered by falling back to an empty default.
    LocalState,
}

impl AppError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::HttpClient(_) | AppError::RateLimited(_) => ErrorClass::Transient,
            AppError::RemoteStatus { status, .. } if *status >= 500 => ErrorClass::Transient,
            AppError::LocalState(_) | AppError::Io(_) => ErrorClass::LocalState,
            _ => ErrorClass::Permanent,
        }
    }

    /// Shorthand for `class() == ErrorClass::Transient`
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            AppError::HttpClient(_) => "http_client",
            AppError::RateLimited(_) => "rate_limited",
            AppError::RemoteStatus { .. } => "remote_status",
            AppError::GraphQl(_) => "graphql",
            AppError::NotFound(_) => "not_found",
            AppError::UnsupportedOwnerType { .. } => "unsupported_owner_type",
            AppError::Decode(_) => "decode",
            AppError::LocalState(_) => "local_state",
            AppError::Io(_) => "io",
            AppError::Serialization(_) => "serialization",
            AppError::Config(_) => "config",
            AppError::Validation(_) => "validation",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
