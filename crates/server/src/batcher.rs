//! Expansion of area requests into tile jobs.
//!
//! Every item of a [`RequestBatch`] is resolved to a box, enumerated into
//! metatiles per zoom level, filtered against the exact shape when the area is
//! GeoJSON, and streamed into the tiles queue in bulk inserts of at most
//! `tiles_batch_size` jobs. Batches already flushed stay committed when a later
//! one fails.

use crate::consumer::JobHandler;
use crate::error::ExpansionError;
use crate::metrics::{MetricsSink, RequestStatus};
use async_trait::async_trait;
use populator_core::config::{ForceConfig, PopulatorConfig};
use populator_core::{AreaItem, RequestBatch, Source, TileGrid, TileJob, WORLD_CRS84};
use populator_queue::{Job, JobQueue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Candidate tiles examined between cooperative yields.
const YIELD_EVERY: u64 = 4096;

/// Totals of one expansion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpansionSummary {
    /// Tile jobs inserted into the tiles queue.
    pub tiles: u64,
    /// Bulk inserts issued.
    pub batches: u64,
}

/// Tiles waiting for the next bulk insert.
enum TileBuffer {
    /// Overlapping coverage is kept as requested.
    Append(Vec<TileJob>),
    /// Overlapping coverage collapses onto one job per dedup key.
    Dedup(HashMap<String, TileJob>),
}

impl TileBuffer {
    fn for_source(source: Source) -> Self {
        match source {
            Source::Api => Self::Append(Vec::new()),
            Source::ExpiredTiles => Self::Dedup(HashMap::new()),
        }
    }

    fn push(&mut self, job: TileJob) {
        match self {
            Self::Append(jobs) => jobs.push(job),
            Self::Dedup(jobs) => {
                jobs.insert(job.dedup_key(), job);
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Append(jobs) => jobs.len(),
            Self::Dedup(jobs) => jobs.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&mut self) -> Vec<TileJob> {
        match self {
            Self::Append(jobs) => std::mem::take(jobs),
            Self::Dedup(jobs) => std::mem::take(jobs).into_values().collect(),
        }
    }
}

/// Turns request jobs into batches of tile jobs on the tiles queue.
pub struct RequestBatcher {
    queue: Arc<dyn JobQueue>,
    tiles_queue: String,
    grid: TileGrid,
    metatile: u32,
    batch_size: usize,
    force: ForceConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl RequestBatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        tiles_queue: impl Into<String>,
        config: &PopulatorConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            queue,
            tiles_queue: tiles_queue.into(),
            grid: WORLD_CRS84,
            metatile: config.metatile_size,
            batch_size: config.tiles_batch_size.max(1),
            force: config.force,
            metrics,
        }
    }

    /// Expand `batch` and insert its tiles, tagging each with `request_id`.
    pub async fn expand(
        &self,
        request_id: Uuid,
        batch: &RequestBatch,
    ) -> Result<ExpansionSummary, ExpansionError> {
        let force = self.force.for_source(batch.source).or(batch.force);
        let mut buffer = TileBuffer::for_source(batch.source);
        let mut summary = ExpansionSummary::default();
        let mut examined: u64 = 0;

        for item in batch.items.iter().cloned().flat_map(AreaItem::flatten) {
            let resolved = item.area.resolve().map_err(ExpansionError::Geometry)?;

            for zoom in item.min_zoom..=item.max_zoom {
                let range = self
                    .grid
                    .tile_range(&resolved.bbox, zoom, self.metatile)
                    .map_err(ExpansionError::Enumeration)?;

                for tile in range.tiles() {
                    examined += 1;
                    if examined % YIELD_EVERY == 0 {
                        tokio::task::yield_now().await;
                    }

                    if resolved.is_exact_shape() && !resolved.intersects(&self.grid.tile_bbox(&tile))
                    {
                        continue;
                    }

                    buffer.push(
                        TileJob::new(tile)
                            .with_parent(request_id)
                            .with_state(batch.state)
                            .with_force(force),
                    );
                    if buffer.len() >= self.batch_size {
                        self.flush(&mut buffer, batch.source, &mut summary).await?;
                    }
                }
            }
        }

        self.flush(&mut buffer, batch.source, &mut summary).await?;
        Ok(summary)
    }

    async fn flush(
        &self,
        buffer: &mut TileBuffer,
        source: Source,
        summary: &mut ExpansionSummary,
    ) -> Result<(), ExpansionError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let jobs = buffer.take();
        let mut per_zoom: BTreeMap<u8, u64> = BTreeMap::new();
        let mut payloads = Vec::with_capacity(jobs.len());
        for job in &jobs {
            *per_zoom.entry(job.tile.z).or_default() += 1;
            payloads.push(serde_json::to_value(job)?);
        }
        let count = payloads.len() as u64;

        self.queue
            .bulk_insert(&self.tiles_queue, payloads)
            .await
            .map_err(|source| ExpansionError::Flush {
                flushed: summary.tiles,
                source,
            })?;

        summary.tiles += count;
        summary.batches += 1;
        for (zoom, tiles) in per_zoom {
            self.metrics.tiles_populated(source, zoom, tiles);
        }
        self.metrics.batch_handled(source);

        tracing::debug!(
            queue = %self.tiles_queue,
            source = %source,
            tiles = count,
            total = summary.tiles,
            "tile batch inserted"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler for RequestBatcher {
    async fn handle(&self, job: &Job) -> Result<(), ExpansionError> {
        let batch: RequestBatch = match serde_json::from_value(job.data.clone()) {
            Ok(batch) => batch,
            Err(err) => {
                self.metrics
                    .request_handled(None, RequestStatus::Failed, job.retry_count);
                return Err(err.into());
            }
        };

        tracing::info!(
            job_id = %job.id,
            source = %batch.source,
            items = batch.items.len(),
            retry_count = job.retry_count,
            "expanding request"
        );

        let started = Instant::now();
        let result = self.expand(job.id, &batch).await;
        self.metrics
            .expansion_duration(batch.source, started.elapsed().as_secs_f64());

        match &result {
            Ok(summary) => {
                self.metrics.request_handled(
                    Some(batch.source),
                    RequestStatus::Completed,
                    job.retry_count,
                );
                tracing::info!(
                    job_id = %job.id,
                    source = %batch.source,
                    tiles = summary.tiles,
                    batches = summary.batches,
                    "request expanded"
                );
            }
            Err(_) => {
                self.metrics.request_handled(
                    Some(batch.source),
                    RequestStatus::Failed,
                    job.retry_count,
                );
            }
        }
        result.map(|_| ())
    }
}
