//! Metrics Server Exporter
//!
//! Runs as a Deployment in the cluster, republishing allocatable node
//! capacity and metrics-server usage as Prometheus gauges.

use anyhow::{Context, Result};
use exporter_lib::{
    health::HealthRegistry,
    observability::{ExporterMetrics, StructuredLogger},
    KubeClusterClient, SchedulerBuilder,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metrics-server-exporter");

    let config = config::ExporterConfig::load()?;
    let scheduler_config = config.scheduler_config();
    info!(
        instance = %config.instance,
        api_port = config.api_port,
        in_cluster = config.in_cluster,
        "Exporter configured"
    );

    let client = KubeClusterClient::connect(config.in_cluster).await?;
    let metrics = ExporterMetrics::new().context("Failed to register metrics")?;
    let health_registry = HealthRegistry::new();
    let logger = StructuredLogger::new(&config.instance);

    let (shutdown_tx, _) = broadcast::channel(1);

    // Serving starts only once the initial scrape has populated the gauges
    let scheduler = SchedulerBuilder::new(Arc::new(client), metrics.clone())
        .health(health_registry.clone())
        .logger(logger.clone())
        .config(scheduler_config.clone())
        .start(shutdown_tx.subscribe())
        .await
        .context("Initial scrape failed")?;

    logger.log_startup(
        EXPORTER_VERSION,
        scheduler_config.capacity_interval,
        scheduler_config.usage_interval,
        scheduler_config.scrape_timeout,
    );

    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let mut api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let api_finished = tokio::select! {
        reason = shutdown_signal() => {
            logger.log_shutdown(reason?);
            false
        }
        result = &mut api_handle => {
            logger.log_shutdown("API server exited");
            result.context("API server task panicked")??;
            true
        }
    };

    let _ = shutdown_tx.send(());
    scheduler.stopped().await.context("Scrape loop panicked")?;
    if !api_finished {
        api_handle.await.context("API server task panicked")??;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, returning which one arrived
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for SIGINT")?;
        Ok("SIGINT received")
    }
}
