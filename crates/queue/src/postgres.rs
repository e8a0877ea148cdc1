//! pg-boss compatible job queue client.
//!
//! Reads and writes the `job` table of an existing pg-boss (v9) schema. The
//! schema is owned by pg-boss itself; this client never creates or migrates
//! it, so pg-boss maintenance (expiry, archiving) keeps working alongside.

use crate::error::{QueueError, QueueResult};
use crate::job::{EnqueueOutcome, Job, JobOptions};
use crate::store::JobQueue;
use async_trait::async_trait;
use populator_core::config::PgSslMode;
use serde_json::{Value, json};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{FromRow, Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// SQL text with the schema name already substituted.
struct Statements {
    insert_unique: String,
    insert: String,
    fetch: String,
    complete: String,
    fail: String,
    bulk_insert: String,
    depth: String,
}

impl Statements {
    fn new(schema: &str) -> Self {
        Self {
            insert_unique: format!(
                "INSERT INTO {schema}.job (
                    id, name, data, singletonKey, singletonOn,
                    expireIn, keepUntil, retryLimit, retryDelay, retryBackoff
                )
                VALUES (
                    gen_random_uuid(), $1, $2, $3,
                    'epoch'::timestamp + '1 second'::interval * ($4 * floor(date_part('epoch', now()) / $4)),
                    make_interval(secs => $5), now() + make_interval(hours => $6), $7, $8, $9
                )
                ON CONFLICT DO NOTHING
                RETURNING id"
            ),
            insert: format!(
                "INSERT INTO {schema}.job (
                    id, name, data, expireIn, keepUntil, retryLimit, retryDelay, retryBackoff
                )
                VALUES (
                    gen_random_uuid(), $1, $2,
                    make_interval(secs => $3), now() + make_interval(hours => $4), $5, $6, $7
                )
                RETURNING id"
            ),
            fetch: format!(
                "WITH next AS (
                    SELECT id FROM {schema}.job
                    WHERE name = $1 AND state < 'active' AND startAfter < now()
                    ORDER BY priority DESC, createdOn, id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE {schema}.job j SET
                    state = 'active',
                    startedOn = now(),
                    retryCount = CASE WHEN j.state = 'retry' THEN j.retryCount + 1 ELSE j.retryCount END
                FROM next
                WHERE j.id = next.id
                RETURNING j.id, j.name, j.data, j.retryCount AS retry_count"
            ),
            complete: format!(
                "UPDATE {schema}.job SET
                    completedOn = now(),
                    state = 'completed'
                WHERE name = $1 AND id = $2 AND state = 'active'"
            ),
            fail: format!(
                "UPDATE {schema}.job SET
                    state = CASE
                        WHEN retryCount < retryLimit THEN 'retry'::{schema}.job_state
                        ELSE 'failed'::{schema}.job_state
                    END,
                    completedOn = CASE WHEN retryCount < retryLimit THEN NULL ELSE now() END,
                    startAfter = CASE
                        WHEN retryCount = retryLimit THEN startAfter
                        WHEN NOT retryBackoff THEN now() + retryDelay * interval '1'
                        ELSE now() + (
                            retryDelay * 2 ^ LEAST(16, retryCount + 1) / 2
                            + retryDelay * 2 ^ LEAST(16, retryCount + 1) / 2 * random()
                        ) * interval '1'
                    END,
                    output = $3
                WHERE name = $1 AND id = $2 AND state < 'completed'"
            ),
            bulk_insert: format!(
                "INSERT INTO {schema}.job (
                    id, name, data, expireIn, keepUntil, retryLimit, retryDelay, retryBackoff
                )
                SELECT
                    gen_random_uuid(), $1, payload,
                    make_interval(secs => $3), now() + make_interval(hours => $4), $5, $6, $7
                FROM jsonb_array_elements($2) AS payload"
            ),
            depth: format!(
                "SELECT count(*) FROM {schema}.job WHERE name = $1 AND state < 'completed'"
            ),
        }
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    name: String,
    data: Option<Value>,
    retry_count: i32,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            queue: row.name,
            data: row.data.unwrap_or(Value::Null),
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
        }
    }
}

fn validate_schema(schema: &str) -> QueueResult<()> {
    let valid = !schema.is_empty()
        && schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(QueueError::Config(format!(
            "schema '{schema}' must be a plain identifier"
        )));
    }
    Ok(())
}

fn secs_f64(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

fn clamp_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Job queue backed by pg-boss tables.
pub struct PgBossQueue {
    pool: Pool<Postgres>,
    statements: Statements,
    options: JobOptions,
}

impl PgBossQueue {
    /// Connect using a connection URL.
    pub async fn from_url(
        url: &str,
        schema: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        options: JobOptions,
    ) -> QueueResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, schema, max_connections, statement_timeout_ms, options).await
    }

    /// Connect using individual parameters, keeping the password out of URLs.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        schema: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        options: JobOptions,
    ) -> QueueResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            schema = schema,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to pg-boss queue"
        );

        Self::connect(opts, schema, max_connections, statement_timeout_ms, options).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        schema: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        options: JobOptions,
    ) -> QueueResult<Self> {
        validate_schema(schema)?;

        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        Self::with_pool(pool, schema, options)
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: Pool<Postgres>, schema: &str, options: JobOptions) -> QueueResult<Self> {
        validate_schema(schema)?;
        Ok(Self {
            pool,
            statements: Statements::new(schema),
            options,
        })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl JobQueue for PgBossQueue {
    async fn enqueue_unique(
        &self,
        queue: &str,
        payload: Value,
        key: &str,
        ttl: Duration,
    ) -> QueueResult<EnqueueOutcome> {
        let slot_secs = clamp_i32(ttl.as_secs().max(1));
        let id: Option<Uuid> = sqlx::query_scalar(&self.statements.insert_unique)
            .bind(queue)
            .bind(&payload)
            .bind(key)
            .bind(slot_secs)
            .bind(secs_f64(self.options.expire_in))
            .bind(clamp_i32(self.options.retention.as_secs() / 3600))
            .bind(clamp_i32(u64::from(self.options.retry_limit)))
            .bind(clamp_i32(self.options.retry_delay.as_secs()))
            .bind(self.options.retry_backoff)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match id {
            Some(id) => EnqueueOutcome::Created(id),
            None => EnqueueOutcome::Duplicate,
        })
    }

    async fn enqueue(&self, queue: &str, payload: Value) -> QueueResult<Uuid> {
        let id: Uuid = sqlx::query_scalar(&self.statements.insert)
            .bind(queue)
            .bind(&payload)
            .bind(secs_f64(self.options.expire_in))
            .bind(clamp_i32(self.options.retention.as_secs() / 3600))
            .bind(clamp_i32(u64::from(self.options.retry_limit)))
            .bind(clamp_i32(self.options.retry_delay.as_secs()))
            .bind(self.options.retry_backoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn fetch_one(&self, queue: &str) -> QueueResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&self.statements.fetch)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Job::from))
    }

    async fn complete(&self, queue: &str, id: Uuid) -> QueueResult<()> {
        let result = sqlx::query(&self.statements.complete)
            .bind(queue)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(format!(
                "no active job {id} in {queue}"
            )));
        }
        Ok(())
    }

    async fn fail(&self, queue: &str, id: Uuid, error: &str) -> QueueResult<()> {
        let output = json!({ "message": error });
        let result = sqlx::query(&self.statements.fail)
            .bind(queue)
            .bind(id)
            .bind(&output)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(format!(
                "no pending job {id} in {queue}"
            )));
        }
        Ok(())
    }

    async fn bulk_insert(&self, queue: &str, payloads: Vec<Value>) -> QueueResult<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        let count = payloads.len();
        let inserted = sqlx::query(&self.statements.bulk_insert)
            .bind(queue)
            .bind(Value::Array(payloads))
            .bind(secs_f64(self.options.expire_in))
            .bind(clamp_i32(self.options.retention.as_secs() / 3600))
            .bind(clamp_i32(u64::from(self.options.retry_limit)))
            .bind(clamp_i32(self.options.retry_delay.as_secs()))
            .bind(self.options.retry_backoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if inserted != count as u64 {
            return Err(QueueError::Internal(format!(
                "bulk insert into {queue} wrote {inserted} of {count} jobs"
            )));
        }
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> QueueResult<u64> {
        let count: i64 = sqlx::query_scalar(&self.statements.depth)
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
