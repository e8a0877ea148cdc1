//! Job queue store trait.

use crate::error::QueueResult;
use crate::job::{EnqueueOutcome, Job};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// A durable job queue with at-least-once delivery.
///
/// Fetching is atomic: two consumers never claim the same job. Redelivery of
/// failed jobs follows the retry options the job was inserted with.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a job unless one with the same `key` is inside its `ttl` window.
    async fn enqueue_unique(
        &self,
        queue: &str,
        payload: Value,
        key: &str,
        ttl: Duration,
    ) -> QueueResult<EnqueueOutcome>;

    /// Insert a job unconditionally.
    async fn enqueue(&self, queue: &str, payload: Value) -> QueueResult<Uuid>;

    /// Claim at most one job that is ready to run.
    async fn fetch_one(&self, queue: &str) -> QueueResult<Option<Job>>;

    /// Mark an active job as completed.
    async fn complete(&self, queue: &str, id: Uuid) -> QueueResult<()>;

    /// Mark an active job as failed, recording `error`.
    ///
    /// The store schedules a retry while the job's retry limit allows it.
    async fn fail(&self, queue: &str, id: Uuid, error: &str) -> QueueResult<()>;

    /// Insert many jobs in one round trip.
    async fn bulk_insert(&self, queue: &str, payloads: Vec<Value>) -> QueueResult<()>;

    /// Number of jobs not yet completed.
    async fn queue_depth(&self, queue: &str) -> QueueResult<u64>;
}
