//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values (`GITHUB_TOKEN` / `GITHUB_USERNAME` seed the credentials)
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub github: GitHubConfig,
    pub executor: ExecutorConfig,
    pub fetch: FetchConfig,
    pub bulk: BulkConfig,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub suggestions: SuggestionConfig,
    pub logging: LoggingConfig,
}

/// Remote API credentials and endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// Personal access token (supplied, never negotiated)
    pub token: String,
    /// Login of the viewer the token belongs to
    pub username: String,
    /// GraphQL endpoint (e.g., "https://api.github.com/graphql")
    pub api_url: String,
    pub user_agent: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Request executor tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Minimum gap between two outgoing requests
    pub min_interval_ms: u64,
    /// Remaining-capacity level below which a batch waits for the reset
    pub rate_limit_threshold: u32,
    /// Total attempts per request, first try included
    pub max_attempts: u32,
    /// First backoff delay; doubled on every further attempt
    pub backoff_base_ms: u64,
    /// Upper bound for any single rate-limit sleep
    pub max_rate_limit_wait_secs: u64,
    /// How long a fetched rate-limit snapshot is trusted
    pub snapshot_ttl_secs: u64,
}

/// Pagination tuning
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Nodes per page (API maximum is 100)
    pub page_size: u32,
    /// Courtesy delay between two pages of one traversal
    pub page_delay_ms: u64,
}

/// Bulk executor tuning
#[derive(Debug, Clone, Deserialize)]
pub struct BulkConfig {
    /// Worker pool size
    pub workers: usize,
    /// Courtesy delay after each mutation, per worker
    pub mutation_delay_ms: u64,
    /// Users per aliased info query
    pub info_chunk_size: usize,
    /// Route Organizations to the organization mutations instead of rejecting them
    #[serde(default)]
    pub allow_organizations: bool,
}

/// Local state files
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding every state file
    pub data_dir: PathBuf,
    pub previous_followers_file: String,
    pub new_followers_file: String,
    pub ignore_list_file: String,
    pub cache_file: String,
}

impl StorageConfig {
    pub fn previous_followers_path(&self) -> PathBuf {
        self.data_dir.join(&self.previous_followers_file)
    }

    pub fn new_followers_path(&self) -> PathBuf {
        self.data_dir.join(&self.new_followers_file)
    }

    pub fn ignore_list_path(&self) -> PathBuf {
        self.data_dir.join(&self.ignore_list_file)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_file)
    }
}

/// Retention windows
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// How long a new follower stays in the ledger (default: 3)
    pub new_follower_days: i64,
    /// TTL of cached follows-viewer checks (default: 24)
    pub follows_viewer_ttl_hours: i64,
}

impl RetentionConfig {
    pub fn new_follower_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.new_follower_days)
    }

    pub fn follows_viewer_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.follows_viewer_ttl_hours)
    }
}

/// Suggestion sampler policy
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionConfig {
    /// Followed accounts sampled as seeds
    pub seed_count: usize,
    /// Upper bound on returned suggestions
    pub max_suggestions: usize,
    /// Pages of each seed's following list to read
    pub seed_max_pages: usize,
    /// Optional minimum follower count for enriched suggestions
    pub min_followers: Option<u64>,
    /// Optional minimum following count for enriched suggestions
    pub min_following: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub fn default_directive(&self) -> String {
        format!("followsync={}", self.level.trim().to_lowercase())
    }

    pub fn is_json(&self) -> bool {
        self.format.trim().eq_ignore_ascii_case("json")
    }
}

impl ExecutorConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.max_rate_limit_wait_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 100,
            rate_limit_threshold: 100,
            max_attempts: 3,
            backoff_base_ms: 1000,
            max_rate_limit_wait_secs: 60,
            snapshot_ttl_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FOLLOWSYNC__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let token = std::env::var("GITHUB_TOKEN").unwrap_or_default();
        let username = std::env::var("GITHUB_USERNAME").unwrap_or_default();

        let config = Config::builder()
            .set_default("github.token", token)?
            .set_default("github.username", username)?
            .set_default("github.api_url", "https://api.github.com/graphql")?
            .set_default("github.user_agent", "followsync/0.1.0")?
            .set_default("github.request_timeout_secs", 30)?
            .set_default("executor.min_interval_ms", 100)?
            .set_default("executor.rate_limit_threshold", 100)?
            .set_default("executor.max_attempts", 3)?
            .set_default("executor.backoff_base_ms", 1000)?
            .set_default("executor.max_rate_limit_wait_secs", 60)?
            .set_default("executor.snapshot_ttl_secs", 60)?
            .set_default("fetch.page_size", 100)?
            .set_default("fetch.page_delay_ms", 1000)?
            .set_default("bulk.workers", 4)?
            .set_default("bulk.mutation_delay_ms", 1000)?
            .set_default("bulk.info_chunk_size", 5)?
            .set_default("bulk.allow_organizations", false)?
            .set_default("storage.data_dir", ".")?
            .set_default("storage.previous_followers_file", "previous_followers.txt")?
            .set_default("storage.new_followers_file", "new_followers.json")?
            .set_default("storage.ignore_list_file", "ignore_list.txt")?
            .set_default("storage.cache_file", "user_following_cache.json")?
            .set_default("retention.new_follower_days", 3)?
            .set_default("retention.follows_viewer_ttl_hours", 24)?
            .set_default("suggestions.seed_count", 20)?
            .set_default("suggestions.max_suggestions", 25)?
            .set_default("suggestions.seed_max_pages", 1)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FOLLOWSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.github.token.trim().is_empty() {
            return Err(AppError::Config(
                "github.token is required (set GITHUB_TOKEN or FOLLOWSYNC__GITHUB__TOKEN)"
                    .to_string(),
            ));
        }

        if self.github.username.trim().is_empty() {
            return Err(AppError::Config(
                "github.username is required (set GITHUB_USERNAME or FOLLOWSYNC__GITHUB__USERNAME)"
                    .to_string(),
            ));
        }

        url::Url::parse(&self.github.api_url)
            .map_err(|e| AppError::Config(format!("github.api_url is not a valid URL: {e}")))?;

        if self.executor.max_attempts == 0 {
            return Err(AppError::Config(
                "executor.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.bulk.workers == 0 {
            return Err(AppError::Config(
                "bulk.workers must be greater than 0".to_string(),
            ));
        }

        if !(1..=crate::remote::MAX_ALIASES_PER_QUERY).contains(&self.bulk.info_chunk_size) {
            return Err(AppError::Config(format!(
                "bulk.info_chunk_size must be between 1 and {}",
                crate::remote::MAX_ALIASES_PER_QUERY
            )));
        }

        if self.fetch.page_size == 0 || self.fetch.page_size > 100 {
            return Err(AppError::Config(
                "fetch.page_size must be between 1 and 100".to_string(),
            ));
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.logging.level.trim().to_lowercase().as_str())
        {
            return Err(AppError::Config(format!(
                "logging.level must be one of trace, debug, info, warn, error (got {:?})",
                self.logging.level
            )));
        }

        if !["pretty", "json"].contains(&self.logging.format.trim().to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "logging.format must be \"pretty\" or \"json\" (got {:?})",
                self.logging.format
            )));
        }

        if self.retention.new_follower_days <= 0 {
            return Err(AppError::Config(
                "retention.new_follower_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
