//! Configuration types shared across crates.

use crate::request::Source;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of the upstream queue holding area requests.
pub const REQUEST_QUEUE_PREFIX: &str = "tiles-requests";

/// Prefix of the downstream queue holding tile jobs.
pub const TILES_QUEUE_PREFIX: &str = "tiles";

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Queue store configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueConfig {
    /// pg-boss job tables in PostgreSQL.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer POPULATOR_QUEUE__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Schema holding the pg-boss tables.
        #[serde(default = "default_schema")]
        schema: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default)]
        statement_timeout_ms: Option<u64>,
    },
    /// In-process queue. Nothing survives a restart; use for development only.
    #[default]
    Memory,
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_schema() -> String {
    "pgboss".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl QueueConfig {
    /// Validate queue configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            QueueConfig::Memory => Ok(()),
            QueueConfig::Postgres {
                url,
                host,
                database,
                schema,
                max_connections,
                ..
            } => {
                if schema.is_empty()
                    || !schema
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(format!(
                        "queue schema '{schema}' must be a plain identifier"
                    ));
                }
                if *max_connections == 0 {
                    return Err("queue max_connections must be greater than 0".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres queue config requires either 'url' or 'host' + 'database'"
                            .to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres queue config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Options applied to every job this process inserts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How long an active job may run before the store expires it.
    #[serde(default = "default_expire_in_secs")]
    pub expire_in_secs: u64,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Exponential backoff between retries.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: bool,
    /// How long a job is kept in the queue before it is purged unprocessed.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Window in which an identical area request is rejected as a duplicate.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

fn default_expire_in_secs() -> u64 {
    600
}

fn default_retry_limit() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_retry_backoff() -> bool {
    true
}

fn default_retention_hours() -> u64 {
    87
}

fn default_dedup_window_secs() -> u64 {
    600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            expire_in_secs: default_expire_in_secs(),
            retry_limit: default_retry_limit(),
            retry_delay_secs: default_retry_delay_secs(),
            retry_backoff: default_retry_backoff(),
            retention_hours: default_retention_hours(),
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

impl JobsConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.expire_in_secs == 0 {
            return Err("jobs expire_in_secs must be greater than 0".to_string());
        }
        if self.dedup_window_secs == 0 {
            return Err("jobs dedup_window_secs must be greater than 0".to_string());
        }
        if self.retention_hours == 0 {
            return Err("jobs retention_hours must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Backpressure gate on the consumer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsumeConditionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Wait before re-evaluating a closed gate.
    #[serde(default = "default_consume_delay_secs")]
    pub delay_secs: u64,
    /// Downstream depth at or below which requests are consumed.
    pub tiles_queue_size_limit: Option<u64>,
}

fn default_consume_delay_secs() -> u64 {
    5
}

impl Default for ConsumeConditionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_secs: default_consume_delay_secs(),
            tiles_queue_size_limit: None,
        }
    }
}

impl ConsumeConditionConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Process-wide force overrides per request source.
///
/// A set value replaces whatever force flag the request itself carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceConfig {
    #[serde(default)]
    pub api: Option<bool>,
    #[serde(default)]
    pub expired_tiles: Option<bool>,
}

impl ForceConfig {
    pub fn for_source(&self, source: Source) -> Option<bool> {
        match source {
            Source::Api => self.api,
            Source::ExpiredTiles => self.expired_tiles,
        }
    }
}

/// Names of the two queues a deployment works with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueNames {
    /// Upstream queue of area requests.
    pub requests: String,
    /// Downstream queue of tile jobs.
    pub tiles: String,
}

impl QueueNames {
    pub fn for_project(project_name: &str) -> Self {
        Self {
            requests: format!("{REQUEST_QUEUE_PREFIX}-{project_name}"),
            tiles: format!("{TILES_QUEUE_PREFIX}-{project_name}"),
        }
    }
}

/// Expansion and consumption settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PopulatorConfig {
    /// Project the queues belong to.
    pub project_name: String,
    #[serde(default = "default_metatile_size")]
    pub metatile_size: u32,
    /// Tile jobs per bulk insert.
    #[serde(default = "default_tiles_batch_size")]
    pub tiles_batch_size: usize,
    /// Run the request consumer in this process.
    #[serde(default = "default_enable_request_queue_handling")]
    pub enable_request_queue_handling: bool,
    /// Poll interval of the request consumer.
    #[serde(default = "default_request_queue_check_interval_secs")]
    pub request_queue_check_interval_secs: u64,
    #[serde(default)]
    pub consume_condition: ConsumeConditionConfig,
    #[serde(default)]
    pub force: ForceConfig,
}

fn default_metatile_size() -> u32 {
    8
}

fn default_tiles_batch_size() -> usize {
    10_000
}

fn default_enable_request_queue_handling() -> bool {
    true
}

fn default_request_queue_check_interval_secs() -> u64 {
    5
}

impl PopulatorConfig {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            metatile_size: default_metatile_size(),
            tiles_batch_size: default_tiles_batch_size(),
            enable_request_queue_handling: default_enable_request_queue_handling(),
            request_queue_check_interval_secs: default_request_queue_check_interval_secs(),
            consume_condition: ConsumeConditionConfig::default(),
            force: ForceConfig::default(),
        }
    }

    pub fn queue_names(&self) -> QueueNames {
        QueueNames::for_project(&self.project_name)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.request_queue_check_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.project_name.trim().is_empty() {
            return Err("app project_name must not be empty".to_string());
        }
        if self.metatile_size == 0 {
            return Err("app metatile_size must be greater than 0".to_string());
        }
        if self.tiles_batch_size == 0 {
            return Err("app tiles_batch_size must be greater than 0".to_string());
        }
        if self.request_queue_check_interval_secs == 0 {
            return Err("app request_queue_check_interval_secs must be greater than 0".to_string());
        }
        if self.consume_condition.delay_secs == 0 {
            return Err("app consume_condition.delay_secs must be greater than 0".to_string());
        }
        if self.consume_condition.enabled && self.consume_condition.tiles_queue_size_limit.is_none()
        {
            return Err(
                "app consume_condition.tiles_queue_size_limit is required when the condition is enabled"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    pub app: PopulatorConfig,
}

impl AppConfig {
    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.queue.validate()?;
        self.jobs.validate()?;
        self.app.validate()
    }

    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses the in-memory queue and a short poll interval.
    pub fn for_testing() -> Self {
        let mut app = PopulatorConfig::new("test");
        app.request_queue_check_interval_secs = 1;
        Self {
            server: ServerConfig::default(),
            queue: QueueConfig::Memory,
            jobs: JobsConfig::default(),
            app,
        }
    }
}
