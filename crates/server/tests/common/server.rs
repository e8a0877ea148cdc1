//! Server test utilities.

use super::queue::RecordingQueue;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use populator_core::TileJob;
use populator_core::config::{AppConfig, QueueNames};
use populator_queue::{JobOptions, JobQueue, JobSnapshot};
use populator_server::{AppState, NoopMetrics, QueueConsumer, RequestBatcher, create_router};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// A test server backed by an in-memory queue.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub queue: Arc<RecordingQueue>,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with the testing configuration.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test server with custom config modifications.
    pub fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = AppConfig::for_testing();
        modifier(&mut config);

        let queue = Arc::new(RecordingQueue::new(JobOptions::from(&config.jobs)));
        let state = AppState::new(config, queue.clone() as Arc<dyn JobQueue>);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            queue,
        }
    }

    pub fn names(&self) -> &QueueNames {
        &self.state.names
    }

    /// A batcher writing into this server's tiles queue.
    pub fn batcher(&self) -> RequestBatcher {
        RequestBatcher::new(
            self.queue.clone(),
            self.names().tiles.clone(),
            &self.state.config.app,
            Arc::new(NoopMetrics),
        )
    }

    /// The request consumer as the binary wires it, attached to the probes.
    pub fn attach_consumer(&mut self) -> Arc<QueueConsumer> {
        let consumer = Arc::new(QueueConsumer::for_requests(
            self.queue.clone(),
            &self.state.config.app,
            Arc::new(NoopMetrics),
        ));
        self.state = self.state.clone().with_consumer(consumer.clone());
        self.router = create_router(self.state.clone());
        consumer
    }

    pub async fn request_jobs(&self) -> Vec<JobSnapshot> {
        self.queue.inner.jobs(&self.names().requests).await
    }

    pub async fn tile_jobs(&self) -> Vec<TileJob> {
        self.queue
            .inner
            .jobs(&self.names().tiles)
            .await
            .into_iter()
            .map(|job| serde_json::from_value(job.data).expect("tile job payload"))
            .collect()
    }

    /// Claim and complete every pending tile job.
    pub async fn drain_tiles(&self) -> usize {
        let tiles = self.names().tiles.clone();
        let mut drained = 0;
        while let Some(job) = self.queue.fetch_one(&tiles).await.unwrap() {
            self.queue.complete(&tiles, job.id).await.unwrap();
            drained += 1;
        }
        drained
    }

    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        json_request(&self.router, method, uri, body).await
    }
}

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}
