//! Common test utilities for queue integration tests.

use populator_queue::{JobOptions, PgBossQueue, QueueError, QueueResult};
use sqlx::{Pool, Postgres as SqlxPostgres};
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
/// Tests use this marker to decide whether to skip due to unavailable Docker.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// pg-boss tables as pg-boss itself would create them.
const PGBOSS_SCHEMA: &str = include_str!("../fixtures/pgboss_v9.sql");

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .map(str::trim)
        .filter(|statement| {
            statement.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            })
        })
        .collect()
}

/// A pg-boss queue running in a throwaway PostgreSQL container.
#[allow(dead_code)]
pub struct PostgresTestQueue {
    pub queue: PgBossQueue,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestQueue {
    pub async fn new(options: JobOptions) -> QueueResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                QueueError::Internal(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let queue = PgBossQueue::from_url(&url, "pgboss", 5, None, options).await?;
        for statement in schema_statements(PGBOSS_SCHEMA) {
            sqlx::query(statement).execute(queue.pool()).await?;
        }

        Ok(Self {
            queue,
            _container: container,
        })
    }

    pub fn pool(&self) -> &Pool<SqlxPostgres> {
        self.queue.pool()
    }
}

/// Start a Postgres-backed queue, or return `None` when Docker is unavailable
/// or SKIP_POSTGRES_TESTS is set.
///
/// Only container-start failures cause a skip; schema or connection errors
/// still panic so real regressions are not silently swallowed.
#[allow(dead_code)]
pub async fn postgres_or_skip(options: JobOptions) -> Option<PostgresTestQueue> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }
    match PostgresTestQueue::new(options).await {
        Ok(queue) => Some(queue),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains(POSTGRES_CONTAINER_START_ERR_PREFIX) {
                eprintln!("Skipping PostgreSQL test (Docker unavailable): {msg}");
                None
            } else {
                panic!("PostgreSQL test setup failed: {msg}");
            }
        }
    }
}
