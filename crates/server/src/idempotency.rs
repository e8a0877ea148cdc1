//! Submission of area requests and explicit tiles.
//!
//! Area requests are hashed after normalization and enqueued with the hash as
//! a uniqueness key, so the same request cannot be queued twice within the
//! dedup window. Expansion happens later in the consumer.

use crate::error::SubmitError;
use populator_core::config::{ForceConfig, QueueNames};
use populator_core::{AreaItem, RequestBatch, RequestHash, Source, TileCoordinate, TileJob};
use populator_queue::{EnqueueOutcome, JobQueue};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Entry point of the ingress path.
pub struct RequestSubmitter {
    queue: Arc<dyn JobQueue>,
    names: QueueNames,
    dedup_window: Duration,
    force: ForceConfig,
}

impl RequestSubmitter {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        names: QueueNames,
        dedup_window: Duration,
        force: ForceConfig,
    ) -> Self {
        Self {
            queue,
            names,
            dedup_window,
            force,
        }
    }

    /// Enqueue a request unless an identical one is still pending.
    ///
    /// Returns the id of the queued request job.
    pub async fn submit_batch(&self, batch: RequestBatch) -> Result<Uuid, SubmitError> {
        let batch = batch.normalized();
        let hash = RequestHash::compute(&batch)?;
        let payload = serde_json::to_value(&batch)?;

        let outcome = self
            .queue
            .enqueue_unique(&self.names.requests, payload, &hash.to_hex(), self.dedup_window)
            .await?;

        match outcome {
            EnqueueOutcome::Created(request_id) => {
                tracing::info!(
                    request_id = %request_id,
                    source = %batch.source,
                    items = batch.items.len(),
                    hash = %hash,
                    "request queued"
                );
                Ok(request_id)
            }
            EnqueueOutcome::Duplicate => {
                tracing::warn!(source = %batch.source, hash = %hash, "request already in queue");
                Err(SubmitError::Duplicate)
            }
        }
    }

    /// Queue caller-supplied areas.
    pub async fn submit_area_request(
        &self,
        items: Vec<AreaItem>,
        force: Option<bool>,
    ) -> Result<Uuid, SubmitError> {
        self.submit_batch(RequestBatch::new(items, Source::Api).with_force(force))
            .await
    }

    /// Insert tiles straight into the tiles queue, bypassing expansion.
    ///
    /// Returns the number of tile jobs inserted.
    pub async fn submit_explicit_tiles(
        &self,
        tiles: Vec<TileCoordinate>,
        force: Option<bool>,
    ) -> Result<usize, SubmitError> {
        let force = self.force.api.or(force);
        let payloads = tiles
            .into_iter()
            .map(|tile| serde_json::to_value(TileJob::new(tile).with_force(force)))
            .collect::<Result<Vec<_>, _>>()?;
        let count = payloads.len();

        self.queue.bulk_insert(&self.names.tiles, payloads).await?;
        tracing::info!(queue = %self.names.tiles, tiles = count, "tiles queued");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use populator_core::{Area, BoundingBox};
    use populator_queue::MemoryQueue;
    use serde_json::json;

    fn submitter(queue: Arc<MemoryQueue>, force: ForceConfig) -> RequestSubmitter {
        RequestSubmitter::new(
            queue,
            QueueNames::for_project("test"),
            Duration::from_secs(600),
            force,
        )
    }

    fn item() -> AreaItem {
        AreaItem::new(
            Area::BBox(BoundingBox::new(35.2, 31.77, 35.21, 31.8)),
            10,
            12,
        )
    }

    #[tokio::test]
    async fn test_duplicate_request_rejected() {
        let queue = Arc::new(MemoryQueue::default());
        let submitter = submitter(queue.clone(), ForceConfig::default());

        submitter.submit_area_request(vec![item()], None).await.unwrap();
        assert!(matches!(
            submitter.submit_area_request(vec![item()], None).await,
            Err(SubmitError::Duplicate)
        ));
        // a different force flag is a different request
        submitter
            .submit_area_request(vec![item()], Some(true))
            .await
            .unwrap();

        assert_eq!(queue.jobs("tiles-requests-test").await.len(), 2);
    }

    #[tokio::test]
    async fn test_queued_payload_is_a_request_batch() {
        let queue = Arc::new(MemoryQueue::default());
        let submitter = submitter(queue.clone(), ForceConfig::default());

        submitter
            .submit_area_request(vec![item()], Some(false))
            .await
            .unwrap();

        let job = queue.jobs("tiles-requests-test").await.pop().unwrap();
        let batch: RequestBatch = serde_json::from_value(job.data).unwrap();
        assert_eq!(batch.source, Source::Api);
        assert_eq!(batch.force, Some(false));
        assert_eq!(batch.items, vec![item()]);
    }

    #[tokio::test]
    async fn test_explicit_tiles_go_to_tiles_queue() {
        let queue = Arc::new(MemoryQueue::default());
        let submitter = submitter(
            queue.clone(),
            ForceConfig {
                api: Some(true),
                expired_tiles: None,
            },
        );

        let tiles = vec![TileCoordinate::new(1, 2, 3, 1), TileCoordinate::new(4, 5, 6, 8)];
        assert_eq!(
            submitter.submit_explicit_tiles(tiles, Some(false)).await.unwrap(),
            2
        );

        let jobs = queue.jobs("tiles-test").await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].data, json!({"x": 1, "y": 2, "z": 3, "metatile": 1, "force": true}));
        assert!(queue.jobs("tiles-requests-test").await.is_empty());
    }
}
