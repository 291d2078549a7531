// Prometheus metrics definitions for the ranking service.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Matchups left in the current stack.
    pub static ref STACK_DEPTH: IntGauge =
        IntGauge::new("mediarank_stack_depth", "Matchups waiting for a vote").unwrap();

    /// Items that took part in the most recent stack build.
    pub static ref POOL_SIZE: IntGauge =
        IntGauge::new("mediarank_pool_size", "Items in the last matchup pool").unwrap();

    /// Items known to the rating store.
    pub static ref RATED_ITEMS: IntGauge =
        IntGauge::new("mediarank_rated_items", "Items in the rating store").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Votes recorded, by outcome (win, loss, draw, punish, self).
    pub static ref VOTES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mediarank_votes_total", "Votes recorded"),
        &["outcome"],
    )
    .unwrap();

    /// Votes rejected or failed, by error kind.
    pub static ref VOTE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mediarank_vote_errors_total", "Votes that failed"),
        &["kind"],
    )
    .unwrap();

    /// Stack rebuilds.
    pub static ref STACK_REBUILDS_TOTAL: IntCounter = IntCounter::new(
        "mediarank_stack_rebuilds_total",
        "Matchup stack rebuilds",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "mediarank_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(STACK_DEPTH.clone()),
        Box::new(POOL_SIZE.clone()),
        Box::new(RATED_ITEMS.clone()),
        Box::new(VOTES_TOTAL.clone()),
        Box::new(VOTE_ERRORS_TOTAL.clone()),
        Box::new(STACK_REBUILDS_TOTAL.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Metric registration skipped: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
