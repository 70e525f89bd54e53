//! Intake worker.
//!
//! The front end enqueues submissions into the store's `jobs` hash with
//! `state=free`. Each intake pass claims free entries, dispatches them, and
//! removes finished entries from the queue. Claiming is a plain rewrite to
//! `state=dispatching` with the same last-write-wins caveat as the record
//! itself; a single allocator instance is the expected deployment.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use hwbroker_types::keys::QUEUE_KEY;
use hwbroker_types::{QueueState, QueuedRequest};

use crate::dispatch::{DispatchError, Dispatcher};
use crate::registry::RegistryError;
use crate::store::{Store, StoreError};

/// Drains the intake queue on a periodic interval.
pub struct IntakeWorker {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    interval: Duration,
}

impl IntakeWorker {
    pub fn new(store: Arc<dyn Store>, dispatcher: Dispatcher, interval: Duration) -> Self {
        Self {
            store,
            dispatcher,
            interval,
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting intake worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_pass().await {
                        Ok(dispatched) => {
                            if dispatched > 0 {
                                info!(dispatched = dispatched, "Intake pass complete");
                            }
                        }
                        Err(e) => error!(error = %e, "Intake pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Intake worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the queue. Returns how many requests reached a
    /// terminal record.
    pub async fn run_pass(&self) -> Result<usize, StoreError> {
        let entries = self.store.hash_get_all(QUEUE_KEY).await?;
        let mut dispatched = 0;

        for (field, value) in entries {
            let queued: QueuedRequest = match serde_json::from_str(&value) {
                Ok(queued) => queued,
                Err(e) => {
                    error!(entry = %field, error = %e, "Failed to decode queued request");
                    continue;
                }
            };
            if queued.state != QueueState::Free {
                continue;
            }

            if let Err(e) = self.claim(&field, &queued).await {
                warn!(entry = %field, error = %e, "Failed to claim queue entry");
                continue;
            }

            match self.dispatcher.dispatch(queued.clone().into_request()).await {
                Ok(record) => {
                    info!(
                        allocation_id = %record.allocation_id,
                        status = %record.status,
                        "Dispatch complete"
                    );
                    self.remove(&field).await;
                    dispatched += 1;
                }
                // A redelivered entry whose record already exists will never
                // dispatch again; drop it from the queue.
                Err(DispatchError::Registry(RegistryError::DuplicateKey(id))) => {
                    warn!(allocation_id = %id, "Queue entry already dispatched, dropping");
                    self.remove(&field).await;
                }
                Err(e) => {
                    error!(
                        allocation_id = %queued.allocation_id,
                        error = %e,
                        "Dispatch failed, releasing claim for retry"
                    );
                    self.release_claim(&field, &queued).await;
                }
            }
        }

        Ok(dispatched)
    }

    async fn claim(&self, field: &str, queued: &QueuedRequest) -> Result<(), StoreError> {
        self.rewrite_state(field, queued, QueueState::Dispatching)
            .await
    }

    async fn release_claim(&self, field: &str, queued: &QueuedRequest) {
        if let Err(e) = self.rewrite_state(field, queued, QueueState::Free).await {
            warn!(entry = %field, error = %e, "Failed to release queue claim");
        }
    }

    async fn rewrite_state(
        &self,
        field: &str,
        queued: &QueuedRequest,
        state: QueueState,
    ) -> Result<(), StoreError> {
        let entry = QueuedRequest {
            state,
            ..queued.clone()
        };
        let payload = serde_json::to_string(&entry).expect("Failed to serialize queue entry");
        self.store.hash_set(QUEUE_KEY, field, &payload).await
    }

    async fn remove(&self, field: &str) {
        if let Err(e) = self.store.hash_del(QUEUE_KEY, &[field.to_string()]).await {
            warn!(entry = %field, error = %e, "Failed to remove queue entry");
        }
    }
}
