//! In-process job queue.
//!
//! Implements the same contract as the Postgres client without persistence.
//! Uniqueness windows roll from the moment a key was inserted. Expired keys
//! and jobs finished longer than the retention period ago are pruned on the
//! next insert. Timing uses
//! `tokio::time`, so tests running on a paused clock can advance it.

use crate::error::{QueueError, QueueResult};
use crate::job::{EnqueueOutcome, Job, JobOptions, JobState};
use crate::store::JobQueue;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Point-in-time view of a stored job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub state: JobState,
    pub data: Value,
    pub retry_count: u32,
    pub output: Option<Value>,
}

#[derive(Debug)]
struct StoredJob {
    id: Uuid,
    queue: String,
    seq: u64,
    data: Value,
    state: JobState,
    retry_count: u32,
    start_after: Instant,
    finished_at: Option<Instant>,
    output: Option<Value>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_seq: u64,
    jobs: HashMap<Uuid, StoredJob>,
    /// Unique keys with the job holding them and the end of their window.
    singletons: HashMap<(String, String), (Uuid, Instant)>,
}

impl MemoryState {
    fn insert(&mut self, queue: &str, data: Value) -> Uuid {
        let id = Uuid::new_v4();
        self.next_seq += 1;
        self.jobs.insert(
            id,
            StoredJob {
                id,
                queue: queue.to_string(),
                seq: self.next_seq,
                data,
                state: JobState::Created,
                retry_count: 0,
                start_after: Instant::now(),
                finished_at: None,
                output: None,
            },
        );
        id
    }

    fn prune(&mut self, now: Instant, retention: Duration) {
        self.singletons.retain(|_, (_, expires_at)| *expires_at > now);
        self.jobs.retain(|_, job| {
            job.finished_at
                .is_none_or(|finished| now.duration_since(finished) < retention)
        });
    }

    fn active_job(&mut self, queue: &str, id: Uuid) -> QueueResult<&mut StoredJob> {
        self.jobs
            .get_mut(&id)
            .filter(|job| job.queue == queue && job.state == JobState::Active)
            .ok_or_else(|| QueueError::NotFound(format!("no active job {id} in {queue}")))
    }
}

/// Non-durable queue for development and tests.
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    options: JobOptions,
}

impl MemoryQueue {
    pub fn new(options: JobOptions) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            options,
        }
    }

    /// All jobs of a queue in insertion order.
    pub async fn jobs(&self, queue: &str) -> Vec<JobSnapshot> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&StoredJob> = state.jobs.values().filter(|j| j.queue == queue).collect();
        jobs.sort_by_key(|j| j.seq);
        jobs.into_iter()
            .map(|j| JobSnapshot {
                id: j.id,
                state: j.state,
                data: j.data.clone(),
                retry_count: j.retry_count,
                output: j.output.clone(),
            })
            .collect()
    }

    pub async fn job_state(&self, id: Uuid) -> Option<JobState> {
        self.state.lock().await.jobs.get(&id).map(|j| j.state)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(JobOptions::default())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue_unique(
        &self,
        queue: &str,
        payload: Value,
        key: &str,
        ttl: Duration,
    ) -> QueueResult<EnqueueOutcome> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune(now, self.options.retention);
        let slot = (queue.to_string(), key.to_string());

        if let Some((existing, _)) = state.singletons.get(&slot)
            && state
                .jobs
                .get(existing)
                .is_some_and(|job| job.state < JobState::Expired)
        {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let id = state.insert(queue, payload);
        state.singletons.insert(slot, (id, now + ttl));
        Ok(EnqueueOutcome::Created(id))
    }

    async fn enqueue(&self, queue: &str, payload: Value) -> QueueResult<Uuid> {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.options.retention);
        Ok(state.insert(queue, payload))
    }

    async fn fetch_one(&self, queue: &str) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let next = state
            .jobs
            .values_mut()
            .filter(|j| j.queue == queue && j.state < JobState::Active && j.start_after <= now)
            .min_by_key(|j| j.seq);

        Ok(next.map(|job| {
            if job.state == JobState::Retry {
                job.retry_count += 1;
            }
            job.state = JobState::Active;
            Job {
                id: job.id,
                queue: job.queue.clone(),
                data: job.data.clone(),
                retry_count: job.retry_count,
            }
        }))
    }

    async fn complete(&self, queue: &str, id: Uuid) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let job = state.active_job(queue, id)?;
        job.state = JobState::Completed;
        job.finished_at = Some(Instant::now());
        Ok(())
    }

    async fn fail(&self, queue: &str, id: Uuid, error: &str) -> QueueResult<()> {
        let options = self.options.clone();
        let mut state = self.state.lock().await;
        let job = state.active_job(queue, id)?;

        job.output = Some(serde_json::json!({ "message": error }));
        if job.retry_count < options.retry_limit {
            job.state = JobState::Retry;
            job.start_after = Instant::now() + options.retry_delay_for(job.retry_count + 1);
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn bulk_insert(&self, queue: &str, payloads: Vec<Value>) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.options.retention);
        for payload in payloads {
            state.insert(queue, payload);
        }
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> QueueResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state.is_pending())
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const QUEUE: &str = "tiles-requests-test";

    fn queue_with_retries(retry_limit: u32) -> MemoryQueue {
        MemoryQueue::new(JobOptions {
            retry_limit,
            retry_delay: Duration::from_secs(5),
            retry_backoff: false,
            ..JobOptions::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_unique_enqueue_window() {
        let queue = MemoryQueue::default();
        let ttl = Duration::from_secs(60);

        let first = queue.enqueue_unique(QUEUE, json!({"a": 1}), "k", ttl).await.unwrap();
        assert!(matches!(first, EnqueueOutcome::Created(_)));
        let second = queue.enqueue_unique(QUEUE, json!({"a": 1}), "k", ttl).await.unwrap();
        assert_eq!(second, EnqueueOutcome::Duplicate);

        let other = queue.enqueue_unique(QUEUE, json!({"a": 2}), "other", ttl).await.unwrap();
        assert!(matches!(other, EnqueueOutcome::Created(_)));

        tokio::time::advance(Duration::from_secs(61)).await;
        let later = queue.enqueue_unique(QUEUE, json!({"a": 1}), "k", ttl).await.unwrap();
        assert!(matches!(later, EnqueueOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_unique_key_scoped_to_queue() {
        let queue = MemoryQueue::default();
        let ttl = Duration::from_secs(60);
        queue.enqueue_unique("a", json!(1), "k", ttl).await.unwrap();
        let outcome = queue.enqueue_unique("b", json!(1), "k", ttl).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_fetch_is_fifo_and_claims_once() {
        let queue = MemoryQueue::default();
        let first = queue.enqueue(QUEUE, json!(1)).await.unwrap();
        let second = queue.enqueue(QUEUE, json!(2)).await.unwrap();

        assert_eq!(queue.fetch_one(QUEUE).await.unwrap().unwrap().id, first);
        assert_eq!(queue.fetch_one(QUEUE).await.unwrap().unwrap().id, second);
        assert!(queue.fetch_one(QUEUE).await.unwrap().is_none());
        assert!(queue.fetch_one("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_depth_counts_until_completed() {
        let queue = MemoryQueue::default();
        queue
            .bulk_insert(QUEUE, vec![json!(1), json!(2), json!(3)])
            .await
            .unwrap();
        assert_eq!(queue.queue_depth(QUEUE).await.unwrap(), 3);

        let job = queue.fetch_one(QUEUE).await.unwrap().unwrap();
        assert_eq!(queue.queue_depth(QUEUE).await.unwrap(), 3);
        queue.complete(QUEUE, job.id).await.unwrap();
        assert_eq!(queue.queue_depth(QUEUE).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_redelivered_until_limit() {
        let queue = queue_with_retries(1);
        let id = queue.enqueue(QUEUE, json!({})).await.unwrap();

        let job = queue.fetch_one(QUEUE).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 0);
        queue.fail(QUEUE, id, "boom").await.unwrap();
        assert_eq!(queue.job_state(id).await, Some(JobState::Retry));

        // not before the retry delay
        assert!(queue.fetch_one(QUEUE).await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(5)).await;

        let job = queue.fetch_one(QUEUE).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
        queue.fail(QUEUE, id, "boom again").await.unwrap();
        assert_eq!(queue.job_state(id).await, Some(JobState::Failed));

        let snapshot = queue.jobs(QUEUE).await.pop().unwrap();
        assert_eq!(snapshot.output, Some(json!({"message": "boom again"})));
        assert_eq!(queue.queue_depth(QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_requires_active_job() {
        let queue = MemoryQueue::default();
        let id = queue.enqueue(QUEUE, json!({})).await.unwrap();
        assert!(matches!(
            queue.complete(QUEUE, id).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_request_frees_its_key() {
        let queue = queue_with_retries(0);
        let ttl = Duration::from_secs(600);
        let EnqueueOutcome::Created(id) = queue
            .enqueue_unique(QUEUE, json!({}), "k", ttl)
            .await
            .unwrap()
        else {
            panic!("expected a new job");
        };
        queue.fetch_one(QUEUE).await.unwrap();
        queue.fail(QUEUE, id, "bad").await.unwrap();

        let outcome = queue.enqueue_unique(QUEUE, json!({}), "k", ttl).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Created(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_jobs_and_expired_keys_are_pruned() {
        let queue = MemoryQueue::new(JobOptions {
            retry_limit: 0,
            retention: Duration::from_secs(3600),
            ..JobOptions::default()
        });
        let ttl = Duration::from_secs(60);

        let EnqueueOutcome::Created(done) = queue
            .enqueue_unique(QUEUE, json!({"a": 1}), "k", ttl)
            .await
            .unwrap()
        else {
            panic!("expected a new job");
        };
        queue.fetch_one(QUEUE).await.unwrap();
        queue.complete(QUEUE, done).await.unwrap();
        let pending = queue.enqueue(QUEUE, json!({"a": 2})).await.unwrap();

        // retained until the retention period has passed
        tokio::time::advance(Duration::from_secs(120)).await;
        queue.enqueue("other", json!({})).await.unwrap();
        assert_eq!(queue.job_state(done).await, Some(JobState::Completed));
        assert!(queue.state.lock().await.singletons.is_empty());

        tokio::time::advance(Duration::from_secs(3600)).await;
        queue.bulk_insert("other", vec![json!({})]).await.unwrap();
        assert_eq!(queue.job_state(done).await, None);
        assert_eq!(queue.job_state(pending).await, Some(JobState::Created));
        assert_eq!(queue.queue_depth(QUEUE).await.unwrap(), 1);
    }
}
