//! Prometheus metrics registry and instruments.
//!
//! Instruments are process-wide and safe to touch before `init_metrics`;
//! registration only controls what `gather_text` exports.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Remote API Metrics
    pub static ref REMOTE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("followsync_remote_requests_total", "Total number of remote API requests"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref REMOTE_RETRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("followsync_remote_retries_total", "Total number of retried remote API requests"),
        &["reason"]
    ).expect("metric can be created");
    pub static ref REMOTE_REQUEST_DURATION_SECONDS: prometheus::Histogram = prometheus::Histogram::with_opts(
        HistogramOpts::new(
            "followsync_remote_request_duration_seconds",
            "Remote API request duration in seconds"
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("metric can be created");
    pub static ref RATE_LIMIT_REMAINING: IntGauge = IntGauge::new(
        "followsync_rate_limit_remaining",
        "Last observed remaining rate-limit capacity"
    ).expect("metric can be created");

    // Bulk Metrics
    pub static ref BULK_ACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("followsync_bulk_actions_total", "Total number of bulk follow/unfollow actions"),
        &["action", "outcome"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("followsync_cache_hits_total", "Total number of cache hits"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("followsync_cache_misses_total", "Total number of cache misses"),
        &["kind"]
    ).expect("metric can be created");

    // Graph Metrics
    pub static ref LEDGER_SIZE: IntGauge = IntGauge::new(
        "followsync_ledger_size",
        "Number of new followers inside the retention window"
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(REMOTE_REQUESTS_TOTAL.clone()))
            .expect("REMOTE_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(REMOTE_RETRIES_TOTAL.clone()))
            .expect("REMOTE_RETRIES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(REMOTE_REQUEST_DURATION_SECONDS.clone()))
            .expect("REMOTE_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(RATE_LIMIT_REMAINING.clone()))
            .expect("RATE_LIMIT_REMAINING can be registered");
        REGISTRY
            .register(Box::new(BULK_ACTIONS_TOTAL.clone()))
            .expect("BULK_ACTIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("CACHE_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("CACHE_MISSES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(LEDGER_SIZE.clone()))
            .expect("LEDGER_SIZE can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(%error, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
