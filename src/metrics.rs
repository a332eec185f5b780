//! Prometheus metrics for the inventory gateway
//!
//! Defines metrics for:
//! - Request counts by mode and status
//! - Request latency
//! - Provider call counts by provider, operation and outcome
//! - Provider call duration

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

lazy_static! {
    /// Registry for all metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// HTTP request counter by mode and status
    pub static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("inventory_http_requests_total", "Total HTTP requests"),
        &["mode", "status"]
    )
    .expect("metric definition is valid");

    /// HTTP request latency histogram
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "inventory_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(LATENCY_BUCKETS.to_vec()),
        &["mode"]
    )
    .expect("metric definition is valid");

    /// Provider call counter by provider, operation and outcome
    pub static ref PROVIDER_CALLS: IntCounterVec = IntCounterVec::new(
        Opts::new("inventory_provider_calls_total", "Total provider calls"),
        &["provider", "operation", "outcome"]
    )
    .expect("metric definition is valid");

    /// Provider call duration histogram
    pub static ref PROVIDER_CALL_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "inventory_provider_call_duration_seconds",
            "Provider call duration in seconds"
        )
        .buckets(LATENCY_BUCKETS.to_vec()),
        &["provider"]
    )
    .expect("metric definition is valid");
}

/// Register all metrics with the global registry
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(HTTP_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_CALLS.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_CALL_DURATION.clone()))?;
    Ok(())
}

/// Render the registry in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn record_request(mode: &str, status: u16, elapsed_secs: f64) {
    HTTP_REQUESTS
        .with_label_values(&[mode, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[mode])
        .observe(elapsed_secs);
}

pub fn record_provider_call(provider: &str, operation: &str, outcome: &str, elapsed_secs: f64) {
    PROVIDER_CALLS
        .with_label_values(&[provider, operation, outcome])
        .inc();
    PROVIDER_CALL_DURATION
        .with_label_values(&[provider])
        .observe(elapsed_secs);
}
