//! Prometheus metrics for the populator.
//!
//! Expansion and consumption code records through [`MetricsSink`], so the
//! instrumentation can be swapped for [`NoopMetrics`] without changing
//! behaviour. [`PrometheusMetrics`] writes to the process-wide registry
//! exposed at `/metrics`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use populator_core::Source;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static TILES_POPULATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "populator_tiles_populated_total",
            "Total number of tile jobs inserted into the tiles queue",
        ),
        &["source", "zoom"],
    )
    .expect("metric creation failed")
});

pub static BATCHES_HANDLED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "populator_batches_handled_total",
            "Total number of tile batches bulk-inserted",
        ),
        &["source"],
    )
    .expect("metric creation failed")
});

pub static REQUESTS_HANDLED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "populator_requests_handled_total",
            "Total number of area requests taken from the request queue",
        ),
        &["source", "status", "retry_count"],
    )
    .expect("metric creation failed")
});

pub static EXPANSION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "populator_expansion_duration_seconds",
            "Time spent expanding one area request into tiles",
        )
        .buckets(vec![
            0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0,
        ]),
        &["source"],
    )
    .expect("metric creation failed")
});

pub static JOBS_IN_FLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "populator_consumer_jobs_in_flight",
        "Number of request jobs currently being expanded",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent; tests and embedded routers may call it repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(TILES_POPULATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BATCHES_HANDLED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_HANDLED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EXPANSION_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOBS_IN_FLIGHT.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for the /metrics endpoint.
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

/// Outcome label for a handled request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Instrumentation hooks used by expansion and consumption.
pub trait MetricsSink: Send + Sync {
    fn tiles_populated(&self, source: Source, zoom: u8, count: u64);

    fn batch_handled(&self, source: Source);

    /// `source` is `None` when the payload could not be decoded.
    fn request_handled(&self, source: Option<Source>, status: RequestStatus, retry_count: u32);

    fn expansion_duration(&self, source: Source, seconds: f64);

    fn jobs_in_flight(&self, count: usize);
}

/// Records into the global Prometheus registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrometheusMetrics;

impl MetricsSink for PrometheusMetrics {
    fn tiles_populated(&self, source: Source, zoom: u8, count: u64) {
        TILES_POPULATED
            .with_label_values(&[source.as_str(), &zoom.to_string()])
            .inc_by(count);
    }

    fn batch_handled(&self, source: Source) {
        BATCHES_HANDLED.with_label_values(&[source.as_str()]).inc();
    }

    fn request_handled(&self, source: Option<Source>, status: RequestStatus, retry_count: u32) {
        let source = source.map_or("unknown", |s| s.as_str());
        REQUESTS_HANDLED
            .with_label_values(&[source, status.as_str(), &retry_count.to_string()])
            .inc();
    }

    fn expansion_duration(&self, source: Source, seconds: f64) {
        EXPANSION_DURATION
            .with_label_values(&[source.as_str()])
            .observe(seconds);
    }

    fn jobs_in_flight(&self, count: usize) {
        JOBS_IN_FLIGHT.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn tiles_populated(&self, _source: Source, _zoom: u8, _count: u64) {}

    fn batch_handled(&self, _source: Source) {}

    fn request_handled(&self, _source: Option<Source>, _status: RequestStatus, _retry_count: u32) {
    }

    fn expansion_duration(&self, _source: Source, _seconds: f64) {}

    fn jobs_in_flight(&self, _count: usize) {}
}
