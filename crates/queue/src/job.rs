//! Job records and per-job options.

use populator_core::config::JobsConfig;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a job, in the order the store compares states.
///
/// Anything below [`JobState::Completed`] counts towards queue depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobState {
    Created,
    Retry,
    Active,
    Completed,
    Expired,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Retry => "retry",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "retry" => Some(Self::Retry),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Still waiting for, or undergoing, processing.
    pub fn is_pending(&self) -> bool {
        *self < Self::Completed
    }
}

/// A job claimed by [`crate::JobQueue::fetch_one`].
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub data: Value,
    /// Number of earlier attempts that failed.
    pub retry_count: u32,
}

/// Result of a unique enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(Uuid),
    /// A job with the same key is already inside its uniqueness window.
    Duplicate,
}

/// Options stamped onto every job a client inserts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOptions {
    pub expire_in: Duration,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub retry_backoff: bool,
    pub retention: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for JobOptions {
    fn from(config: &JobsConfig) -> Self {
        Self {
            expire_in: Duration::from_secs(config.expire_in_secs),
            retry_limit: config.retry_limit,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            retry_backoff: config.retry_backoff,
            retention: Duration::from_secs(config.retention_hours * 3600),
        }
    }
}

impl JobOptions {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        if !self.retry_backoff {
            return self.retry_delay;
        }
        let factor = 2u32.saturating_pow(attempt.min(16)) / 2;
        self.retry_delay.saturating_mul(factor.max(1))
    }
}
