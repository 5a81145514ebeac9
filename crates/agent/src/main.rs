//! Surge agent - firewall-event surge watcher
//!
//! Runs the watch cycle on a fixed cadence and serves health and
//! metrics endpoints until interrupted.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use surge_agent::api;
use surge_lib::{
    scheduler::{CycleScheduler, ScheduleConfig},
    HealthRegistry, StructuredLogger, SurgeMetrics, SurgeWatch, WatchConfig,
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Optional TOML file layered under the environment
const CONFIG_PATH_ENV: &str = "SURGE_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = WatchConfig::load(config_path.as_deref()).context("Invalid configuration")?;
    info!(
        node_name = %config.node_name,
        state_path = %config.state_path.display(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = SurgeMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION, &config.scope().label());

    let watch = Arc::new(SurgeWatch::from_config(&config, health_registry.clone())?);

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = CycleScheduler::new(watch, ScheduleConfig::from(&config));
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    if shutdown_tx.send(()).is_err() {
        warn!("Scheduler already stopped");
    }
    let cycles = scheduler_handle.await?;
    api_handle.abort();

    info!(cycles = cycles, "Shutdown complete");
    Ok(())
}
