//! Background reconciliation worker.
//!
//! Connects to the record store, the directory and the secret store, then
//! sweeps every active tenant until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use statesync_clients::{GraphDirectoryClient, KeyVaultSecretClient};
use statesync_db::{log_pool_health, Database, PoolConfig};
use statesync_engine::{EngineContext, ResilienceConfig, ValidatorConfig};
use statesync_jobs::{SweepConfig, SweepCoordinator, SweepEvent, SweepScheduler};

/// How long to wait for the scheduler to finish its tenant in flight.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   RUST_LOG    - standard env filter (default: "statesync=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "statesync=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to the record store")?;
    db.ensure_schema()
        .await
        .context("failed to initialize the schema")?;

    let pool = db.pool().clone();

    let directory = GraphDirectoryClient::from_env().context("directory client")?;
    let secrets = KeyVaultSecretClient::from_env().context("secret store client")?;

    let ctx = EngineContext::new(
        Arc::new(db),
        Arc::new(directory),
        Arc::new(secrets),
        &ResilienceConfig::from_env(),
    );
    let config = SweepConfig::from_env();
    let coordinator = Arc::new(SweepCoordinator::new(
        ctx,
        ValidatorConfig::from_env(),
        &config,
    ));

    let handle = SweepScheduler::new(coordinator, config).start();
    let mut events = handle.events();

    let mut cycles = handle.events();
    tokio::spawn(async move {
        loop {
            match cycles.recv().await {
                Ok(SweepEvent::CycleCompleted { .. }) => log_pool_health(&pool),
                Ok(SweepEvent::SchedulerStopped) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    });
    info!(subsystem = "jobs", "statesync worker running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!(subsystem = "jobs", "Shutdown requested");

    // The scheduler may already have stopped (disabled), in which case the
    // channel is closed.
    if let Err(e) = handle.shutdown().await {
        warn!(subsystem = "jobs", error = %e, "Scheduler already stopped");
        return Ok(());
    }

    let stopped = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Ok(event) = events.recv().await {
            if event == SweepEvent::SchedulerStopped {
                break;
            }
        }
    })
    .await;
    if stopped.is_err() {
        warn!(
            subsystem = "jobs",
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Scheduler did not stop in time"
        );
    }

    info!(subsystem = "jobs", "statesync worker stopped");
    Ok(())
}
