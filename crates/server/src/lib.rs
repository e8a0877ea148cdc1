//! Tiles populator service.
//!
//! This crate provides:
//! - The HTTP boundary for area and explicit tile requests
//! - Request deduplication on the upstream queue
//! - Expansion of area requests into batches of tile jobs
//! - The backpressure-aware request queue consumer

pub mod batcher;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod metrics;
pub mod routes;
pub mod state;

pub use batcher::{ExpansionSummary, RequestBatcher};
pub use consumer::{ConsumeCondition, JobHandler, QueueConsumer, QueueDepthCondition};
pub use error::{ApiError, ConsumerError, ExpansionError, SubmitError};
pub use idempotency::RequestSubmitter;
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use routes::create_router;
pub use state::AppState;
