//! Tiles populator binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use populator_core::config::AppConfig;
use populator_queue::JobOptions;
use populator_server::metrics::PrometheusMetrics;
use populator_server::{AppState, QueueConsumer, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tiles populator - expands area requests into tile jobs
#[derive(Parser, Debug)]
#[command(name = "populatord")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "POPULATOR_CONFIG",
        default_value = "config/populator.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tiles populator v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    populator_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let queue = populator_queue::from_config(&config.queue, JobOptions::from(&config.jobs))
        .await
        .context("failed to initialize queue store")?;

    // Refuse to start against an unreachable store.
    let names = config.app.queue_names();
    queue
        .queue_depth(&names.tiles)
        .await
        .context("queue store health check failed")?;
    tracing::info!(
        requests = %names.requests,
        tiles = %names.tiles,
        "Queue store connectivity verified"
    );

    let mut state = AppState::new(config.clone(), queue.clone());

    let consumer_failed = Arc::new(Notify::new());
    let mut consumer = None;
    let mut supervisor = None;
    if config.app.enable_request_queue_handling {
        let request_consumer = Arc::new(QueueConsumer::for_requests(
            queue.clone(),
            &config.app,
            Arc::new(PrometheusMetrics),
        ));
        if let Some(handle) = request_consumer.start() {
            supervisor = Some(supervise(handle, consumer_failed.clone()));
        }
        state = state.with_consumer(request_consumer.clone());
        consumer = Some(request_consumer);
        tracing::info!(
            interval_secs = config.app.request_queue_check_interval_secs,
            backpressure = config.app.consume_condition.enabled,
            "Request queue consumer spawned"
        );
    } else {
        tracing::info!("Request queue handling disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(consumer_failed))
        .await?;

    if let Some(consumer) = &consumer {
        consumer.stop();
    }
    if let Some(supervisor) = supervisor {
        supervisor
            .await
            .context("consumer supervisor panicked")?
            .context("request consumer failed")?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load configuration from the optional file and `POPULATOR_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with("POPULATOR_") && key != "POPULATOR_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: populatord --config /path/to/config.toml\n  \
             2. Environment variables: POPULATOR_APP__PROJECT_NAME=world \
             POPULATOR_QUEUE__TYPE=postgres POPULATOR_QUEUE__URL=postgres://... populatord\n\n\
             See config/populator.example.toml for example configuration.\n\
             Set POPULATOR_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    figment
        .merge(Env::prefixed("POPULATOR_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Await the consumer loop, raising `failed` if it ends in error.
fn supervise(
    handle: JoinHandle<Result<(), populator_server::ConsumerError>>,
    failed: Arc<Notify>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let result = match handle.await {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::anyhow!("consumer task aborted: {e}")),
        };
        if result.is_err() {
            failed.notify_one();
        }
        result
    })
}

/// Resolves on Ctrl-C, SIGTERM, or a fatal consumer error.
async fn shutdown_signal(consumer_failed: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
        _ = consumer_failed.notified() => {
            tracing::error!("Request consumer failed, shutting down");
        }
    }
}
