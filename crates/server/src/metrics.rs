//! Prometheus metrics for the pyre server.
//!
//! Metrics carry no artifact ids, file names or sizes of individual
//! artifacts, only aggregate counts. The `/metrics` endpoint is
//! unauthenticated and should be reachable only by the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS_INITIALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pyre_uploads_initialized_total",
        "Total number of chunked uploads initialized",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("pyre_chunks_received_total", "Total number of chunks stored")
        .expect("metric creation failed")
});

pub static CHUNK_BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pyre_chunk_bytes_received_total",
        "Total bytes received in chunk bodies",
    )
    .expect("metric creation failed")
});

pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "pyre_chunk_upload_duration_seconds",
            "Time taken to store a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static MERGES_TRIGGERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pyre_merges_triggered_total",
        "Total number of merges started after the last chunk arrived",
    )
    .expect("metric creation failed")
});

// Artifact metrics
pub static ARTIFACTS_STORED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("pyre_artifacts_stored_total", "Total artifacts stored"),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static ARTIFACTS_EXPIRED_ON_READ: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pyre_artifacts_expired_on_read_total",
            "Reads that found an expired artifact",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Burn metrics
pub static BURNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("pyre_burns_total", "Burn requests by origin and outcome"),
        &["origin", "outcome"],
    )
    .expect("metric creation failed")
});

pub static BURNS_IN_FLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("pyre_burns_in_flight", "Burns currently being executed")
        .expect("metric creation failed")
});

// Cleanup metrics
pub static CLEANUP_CYCLES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("pyre_cleanup_cycles_total", "Total cleanup cycles run")
        .expect("metric creation failed")
});

pub static CLEANUP_EXPIRED_FOUND: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pyre_cleanup_expired_found_total",
        "Expired records found by cleanup cycles",
    )
    .expect("metric creation failed")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOADS_INITIALIZED.clone()),
            Box::new(CHUNKS_RECEIVED.clone()),
            Box::new(CHUNK_BYTES_RECEIVED.clone()),
            Box::new(CHUNK_UPLOAD_DURATION.clone()),
            Box::new(MERGES_TRIGGERED.clone()),
            Box::new(ARTIFACTS_STORED.clone()),
            Box::new(ARTIFACTS_EXPIRED_ON_READ.clone()),
            Box::new(BURNS.clone()),
            Box::new(BURNS_IN_FLIGHT.clone()),
            Box::new(CLEANUP_CYCLES.clone()),
            Box::new(CLEANUP_EXPIRED_FOUND.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!(error = %e, "Failed to register metric");
            }
        }
    });
}

/// Record the outcome of one burn request.
pub fn record_burn(origin: &str, outcome: &str) {
    BURNS.with_label_values(&[origin, outcome]).inc();
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
