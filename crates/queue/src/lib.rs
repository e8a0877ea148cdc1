//! Job queue access for the tiles populator.
//!
//! The populator does not own its queue storage. This crate talks to the
//! job tables of an existing pg-boss deployment and offers an in-process
//! stand-in with the same contract for development and tests.

pub mod error;
pub mod job;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use job::{EnqueueOutcome, Job, JobOptions, JobState};
pub use memory::{JobSnapshot, MemoryQueue};
pub use postgres::PgBossQueue;
pub use store::JobQueue;

use populator_core::config::QueueConfig;
use std::sync::Arc;

/// Create a job queue client from configuration.
pub async fn from_config(
    config: &QueueConfig,
    options: JobOptions,
) -> QueueResult<Arc<dyn JobQueue>> {
    match config {
        QueueConfig::Memory => {
            tracing::warn!("Using in-memory job queue; queued work is lost on restart");
            Ok(Arc::new(MemoryQueue::new(options)) as Arc<dyn JobQueue>)
        }
        QueueConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            schema,
            max_connections,
            statement_timeout_ms,
        } => {
            let queue = if let Some(url) = url {
                tracing::info!("Connecting to pg-boss queue using connection URL");
                PgBossQueue::from_url(url, schema, *max_connections, *statement_timeout_ms, options)
                    .await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PgBossQueue::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    schema,
                    *max_connections,
                    *statement_timeout_ms,
                    options,
                )
                .await?
            } else {
                return Err(QueueError::Config(
                    "postgres queue config requires either 'url' or 'host' + 'database'"
                        .to_string(),
                ));
            };
            Ok(Arc::new(queue) as Arc<dyn JobQueue>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_from_config_memory() {
        let queue = from_config(&QueueConfig::Memory, JobOptions::default())
            .await
            .unwrap();
        queue.enqueue("q", json!({})).await.unwrap();
        assert_eq!(queue.queue_depth("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_from_config_postgres_requires_target() {
        let config = QueueConfig::Postgres {
            url: None,
            host: None,
            port: Some(5432),
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            schema: "pgboss".to_string(),
            max_connections: 1,
            statement_timeout_ms: None,
        };
        assert!(matches!(
            from_config(&config, JobOptions::default()).await,
            Err(QueueError::Config(_))
        ));
    }
}
