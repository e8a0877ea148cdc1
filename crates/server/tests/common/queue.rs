//! Queue store wrapper that records calls and injects failures.

use async_trait::async_trait;
use populator_queue::{
    EnqueueOutcome, Job, JobOptions, JobQueue, MemoryQueue, QueueError, QueueResult,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// A [`MemoryQueue`] that remembers bulk insert sizes.
#[allow(dead_code)]
pub struct RecordingQueue {
    pub inner: MemoryQueue,
    bulk_inserts: Mutex<HashMap<String, Vec<usize>>>,
    /// Bulk inserts allowed before they start failing.
    bulk_insert_budget: Mutex<Option<usize>>,
    unavailable: AtomicBool,
}

#[allow(dead_code)]
impl RecordingQueue {
    pub fn new(options: JobOptions) -> Self {
        Self {
            inner: MemoryQueue::new(options),
            bulk_inserts: Mutex::new(HashMap::new()),
            bulk_insert_budget: Mutex::new(None),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Sizes of the successful bulk inserts into `queue`, in call order.
    pub fn bulk_insert_sizes(&self, queue: &str) -> Vec<usize> {
        self.bulk_inserts
            .lock()
            .unwrap()
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Let `count` more bulk inserts succeed, then fail the rest.
    pub fn fail_bulk_inserts_after(&self, count: usize) {
        *self.bulk_insert_budget.lock().unwrap() = Some(count);
    }

    /// Make every operation fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Internal("queue store unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue_unique(
        &self,
        queue: &str,
        payload: Value,
        key: &str,
        ttl: Duration,
    ) -> QueueResult<EnqueueOutcome> {
        self.check_available()?;
        self.inner.enqueue_unique(queue, payload, key, ttl).await
    }

    async fn enqueue(&self, queue: &str, payload: Value) -> QueueResult<Uuid> {
        self.check_available()?;
        self.inner.enqueue(queue, payload).await
    }

    async fn fetch_one(&self, queue: &str) -> QueueResult<Option<Job>> {
        self.check_available()?;
        self.inner.fetch_one(queue).await
    }

    async fn complete(&self, queue: &str, id: Uuid) -> QueueResult<()> {
        self.check_available()?;
        self.inner.complete(queue, id).await
    }

    async fn fail(&self, queue: &str, id: Uuid, error: &str) -> QueueResult<()> {
        self.check_available()?;
        self.inner.fail(queue, id, error).await
    }

    async fn bulk_insert(&self, queue: &str, payloads: Vec<Value>) -> QueueResult<()> {
        self.check_available()?;
        {
            let mut budget = self.bulk_insert_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => return Err(QueueError::Internal("bulk insert rejected".to_string())),
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        let size = payloads.len();
        self.inner.bulk_insert(queue, payloads).await?;
        self.bulk_inserts
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push(size);
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> QueueResult<u64> {
        self.check_available()?;
        self.inner.queue_depth(queue).await
    }
}
