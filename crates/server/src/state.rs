//! Application state shared across handlers.

use crate::consumer::QueueConsumer;
use crate::idempotency::RequestSubmitter;
use populator_core::config::{AppConfig, QueueNames};
use populator_queue::JobQueue;
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Queue store shared by ingress and the consumer.
    pub queue: Arc<dyn JobQueue>,
    /// Request and tiles queue names of this project.
    pub names: QueueNames,
    pub submitter: Arc<RequestSubmitter>,
    /// Request consumer, when this process runs one.
    pub consumer: Option<Arc<QueueConsumer>>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: AppConfig, queue: Arc<dyn JobQueue>) -> Self {
        let names = config.app.queue_names();
        let submitter = Arc::new(RequestSubmitter::new(
            queue.clone(),
            names.clone(),
            config.jobs.dedup_window(),
            config.app.force,
        ));
        Self {
            config: Arc::new(config),
            queue,
            names,
            submitter,
            consumer: None,
        }
    }

    /// Attach the consumer whose health the probes report.
    pub fn with_consumer(mut self, consumer: Arc<QueueConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }
}
