//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kindling_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref SIGNATURE_VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kindling_signature_verifications_total", "Total number of inbound HTTP signature verifications"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref ACTOR_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kindling_actor_fetches_total", "Total number of remote actor fetches"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref ACTOR_FETCH_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "kindling_actor_fetch_duration_seconds",
            "Remote actor fetch duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["outcome"]
    ).expect("metric can be created");

    // OAuth2 Metrics
    pub static ref TOKEN_GRANTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kindling_token_grants_total", "Total number of OAuth2 token grants"),
        &["provider", "grant_type", "outcome"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kindling_errors_total", "Total number of errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SIGNATURE_VERIFICATIONS_TOTAL.clone()))
        .expect("SIGNATURE_VERIFICATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ACTOR_FETCHES_TOTAL.clone()))
        .expect("ACTOR_FETCHES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ACTOR_FETCH_DURATION_SECONDS.clone()))
        .expect("ACTOR_FETCH_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(TOKEN_GRANTS_TOTAL.clone()))
        .expect("TOKEN_GRANTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
