//! hwbroker allocator
//!
//! The allocator brokers hardware demands between clients and a pool of
//! independent resource managers: it drains the intake queue, probes
//! candidate RMs, commits with exactly one winner, persists the allocation
//! record, and republishes every state change over the store's pub/sub bus.
//! The user-facing HTTP/web-socket front end is a separate service; this
//! binary only runs the lifecycle engine.

use std::sync::Arc;

use anyhow::Result;
use hwbroker_allocator::{
    config,
    dispatch::Dispatcher,
    notify::Notifier,
    registry::Registry,
    rm::{RmClient, RmDirectory},
    store::{RedisStore, Store},
    worker::{IntakeWorker, JanitorWorker},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to HWB_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting hwbroker allocator");
    info!(store_url = %config.store_url, "Configuration loaded");

    // Connect to the store once; everything that needs it gets a handle
    // injected, never a global.
    let store: Arc<dyn Store> = match RedisStore::connect(&config.store_url).await {
        Ok(store) => {
            info!("Store connection established");
            Arc::new(store)
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to store");
            return Err(e.into());
        }
    };

    let notifier = Notifier::new(store.clone());
    let registry = Registry::new(store.clone(), notifier, config.allocation_ttl);
    let directory = RmDirectory::new(store.clone());
    let client = RmClient::new(config.rm.clone());
    let dispatcher = Dispatcher::new(registry.clone(), directory, client);

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start intake worker in background
    let intake_worker = IntakeWorker::new(store.clone(), dispatcher, config.intake_interval);
    let intake_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            intake_worker.run(shutdown_rx).await;
        }
    });

    // Start janitor worker in background
    let janitor_handle = if config.janitor_enabled {
        let janitor_worker = JanitorWorker::new(registry, config.janitor_interval);
        Some(tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move {
                janitor_worker.run(shutdown_rx).await;
            }
        }))
    } else {
        info!("Janitor disabled by configuration");
        None
    };

    // Wait for shutdown signal (Ctrl+C)
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Wait for workers to finish
    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, intake_handle).await {
        warn!(error = %e, "Intake worker did not shut down in time");
    }

    if let Some(handle) = janitor_handle {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Janitor worker did not shut down in time");
        }
    }

    info!("Allocator shutdown complete");
    Ok(())
}
