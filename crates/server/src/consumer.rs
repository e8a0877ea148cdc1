//! Polling consumer for the request queue.
//!
//! The loop fetches at most one job per iteration and sleeps the poll
//! interval after every iteration, whether or not a job was found. Jobs are
//! handed to a [`JobHandler`] on a spawned task, so a long expansion does not
//! hold up polling. A handler that panics fails its job the same way an
//! error does. An optional [`ConsumeCondition`] gates fetching: while it
//! reports false nothing is dequeued and the loop waits the condition delay.
//!
//! `stop()` is cooperative. It is observed at the top of each iteration and
//! wakes any pending sleep, but never interrupts a running handler; the loop
//! waits for in-flight handlers before its task finishes.

use crate::batcher::RequestBatcher;
use crate::error::{ConsumerError, ExpansionError};
use crate::metrics::MetricsSink;
use async_trait::async_trait;
use populator_core::config::PopulatorConfig;
use populator_queue::{Job, JobQueue, QueueResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// Processes one fetched job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), ExpansionError>;
}

/// Decides whether the consumer may fetch right now.
#[async_trait]
pub trait ConsumeCondition: Send + Sync {
    async fn should_consume(&self) -> QueueResult<bool>;
}

/// Open while the tiles queue holds at most `limit` pending jobs.
pub struct QueueDepthCondition {
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    limit: u64,
}

impl QueueDepthCondition {
    pub fn new(queue: Arc<dyn JobQueue>, queue_name: impl Into<String>, limit: u64) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            limit,
        }
    }
}

#[async_trait]
impl ConsumeCondition for QueueDepthCondition {
    async fn should_consume(&self) -> QueueResult<bool> {
        let depth = self.queue.queue_depth(&self.queue_name).await?;
        tracing::debug!(
            queue = %self.queue_name,
            depth,
            limit = self.limit,
            "evaluated consume condition"
        );
        Ok(depth <= self.limit)
    }
}

/// Decrements the in-flight count when a dispatch ends, panics included.
struct InFlight {
    count: Arc<AtomicUsize>,
    metrics: Arc<dyn MetricsSink>,
}

impl InFlight {
    fn enter(count: Arc<AtomicUsize>, metrics: Arc<dyn MetricsSink>) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics.jobs_in_flight(now);
        Self { count, metrics }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let now = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        self.metrics.jobs_in_flight(now);
    }
}

/// Consumes one queue with a single polling loop.
pub struct QueueConsumer {
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    handler: Arc<dyn JobHandler>,
    condition: Option<Arc<dyn ConsumeCondition>>,
    poll_interval: Duration,
    condition_delay: Duration,
    metrics: Arc<dyn MetricsSink>,
    running: AtomicBool,
    /// Bumped on every start so a loop left over from an earlier run exits.
    generation: AtomicU64,
    wake: Notify,
    in_flight: Arc<AtomicUsize>,
    failed: AtomicBool,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        queue_name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            handler,
            condition: None,
            poll_interval,
            condition_delay: poll_interval,
            metrics,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            wake: Notify::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            failed: AtomicBool::new(false),
        }
    }

    /// Consumer of the project's request queue, expanding into its tiles queue.
    ///
    /// Gated on the tiles queue depth when the consume condition is enabled.
    pub fn for_requests(
        queue: Arc<dyn JobQueue>,
        config: &PopulatorConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let names = config.queue_names();
        let batcher = Arc::new(RequestBatcher::new(
            Arc::clone(&queue),
            names.tiles.clone(),
            config,
            Arc::clone(&metrics),
        ));
        let consumer = Self::new(
            Arc::clone(&queue),
            names.requests,
            batcher,
            config.check_interval(),
            metrics,
        );

        let gate = &config.consume_condition;
        match gate.tiles_queue_size_limit {
            Some(limit) if gate.enabled => consumer.with_condition(
                Arc::new(QueueDepthCondition::new(queue, names.tiles, limit)),
                gate.delay(),
            ),
            _ => consumer,
        }
    }

    /// Gate fetching on `condition`, re-checking every `delay` while closed.
    pub fn with_condition(mut self, condition: Arc<dyn ConsumeCondition>, delay: Duration) -> Self {
        self.condition = Some(condition);
        self.condition_delay = delay;
        self
    }

    /// Start the polling loop.
    ///
    /// Returns `None` when the consumer is already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<Result<(), ConsumerError>>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.failed.store(false, Ordering::SeqCst);

        tracing::info!(queue = %self.queue_name, "starting request consumer");
        let consumer = Arc::clone(self);
        Some(tokio::spawn(async move { consumer.run(generation).await }))
    }

    /// Ask the loop to exit after its current iteration.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!(queue = %self.queue_name, "stopping request consumer");
        }
        self.wake.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs handed to the handler and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the loop ended on a queue store error.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run(self: Arc<Self>, generation: u64) -> Result<(), ConsumerError> {
        let mut tasks = JoinSet::new();
        let result = self.poll(generation, &mut tasks).await;

        if let Err(err) = &result {
            self.failed.store(true, Ordering::SeqCst);
            if self.generation.load(Ordering::SeqCst) == generation {
                self.running.store(false, Ordering::SeqCst);
            }
            tracing::error!(queue = %self.queue_name, error = %err, "request consumer failed");
        }

        if !tasks.is_empty() {
            tracing::info!(
                queue = %self.queue_name,
                in_flight = tasks.len(),
                "waiting for in-flight requests"
            );
        }
        while let Some(joined) = tasks.join_next().await {
            self.reap(joined);
        }

        tracing::info!(queue = %self.queue_name, "request consumer stopped");
        result
    }

    async fn poll(&self, generation: u64, tasks: &mut JoinSet<()>) -> Result<(), ConsumerError> {
        while self.is_current(generation) {
            while let Some(joined) = tasks.try_join_next() {
                self.reap(joined);
            }

            if let Some(condition) = &self.condition
                && !condition.should_consume().await?
            {
                tracing::debug!(
                    queue = %self.queue_name,
                    delay_secs = self.condition_delay.as_secs_f64(),
                    "consume condition not met, waiting"
                );
                self.pause(generation, self.condition_delay).await;
                continue;
            }

            match self.queue.fetch_one(&self.queue_name).await? {
                Some(job) => self.dispatch(job, tasks),
                None => tracing::trace!(queue = %self.queue_name, "no request available"),
            }
            self.pause(generation, self.poll_interval).await;
        }
        Ok(())
    }

    /// Sleep for `duration` unless stopped first.
    async fn pause(&self, generation: u64, duration: Duration) {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_current(generation) {
            return;
        }
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    fn dispatch(&self, job: Job, tasks: &mut JoinSet<()>) {
        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        let queue_name = self.queue_name.clone();
        let guard = InFlight::enter(Arc::clone(&self.in_flight), Arc::clone(&self.metrics));

        tasks.spawn(async move {
            let _guard = guard;
            // A panicking handler surfaces as a JoinError so the job is still failed.
            let handled = {
                let job = job.clone();
                tokio::spawn(async move { handler.handle(&job).await }).await
            };
            let error = match handled {
                Ok(Ok(())) => {
                    if let Err(err) = queue.complete(&queue_name, job.id).await {
                        tracing::error!(job_id = %job.id, error = %err, "failed to complete job");
                    }
                    return;
                }
                Ok(Err(err)) => err.to_string(),
                Err(err) => format!("request handler aborted: {err}"),
            };
            tracing::error!(
                job_id = %job.id,
                retry_count = job.retry_count,
                error = %error,
                "request expansion failed"
            );
            if let Err(store_err) = queue.fail(&queue_name, job.id, &error).await {
                tracing::error!(job_id = %job.id, error = %store_err, "failed to fail job");
            }
        });
    }

    fn reap(&self, joined: Result<(), JoinError>) {
        if let Err(err) = joined {
            tracing::error!(queue = %self.queue_name, error = %err, "request handler task aborted");
        }
    }
}
