//! Expiry janitor.
//!
//! Allocation records carry an absolute `expiration`; the lifecycle engine
//! refreshes it on every write but never deletes anything. This worker is
//! the reclaimer: it periodically prunes records whose deadline has passed,
//! regardless of status.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::registry::{Registry, RegistryError};

/// Reclaims expired allocation records on a periodic interval.
pub struct JanitorWorker {
    registry: Registry,
    interval: Duration,
}

impl JanitorWorker {
    pub fn new(registry: Registry, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting janitor worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_pass().await {
                        Ok(removed) => {
                            if removed > 0 {
                                info!(removed = removed, "Reclaimed expired allocations");
                            }
                        }
                        Err(e) => error!(error = %e, "Janitor pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Janitor worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One reclamation pass. Returns how many records were removed.
    pub async fn run_pass(&self) -> Result<u64, RegistryError> {
        let now = Utc::now();
        let expired: Vec<_> = self
            .registry
            .list()
            .await?
            .into_iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(id, _)| id)
            .collect();
        self.registry.delete(&expired).await
    }
}
