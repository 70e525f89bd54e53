//! Dispatch orchestrator.
//!
//! Drives one allocation request through the lifecycle state machine:
//! the record is persisted (`received`) before any RM contact, candidates
//! are probed until one says yes, the commit goes to exactly that winner,
//! and the registry ends up with a terminal `success` or `failed` record.
//!
//! Failure semantics:
//! - An unreachable candidate is a connectivity failure for that candidate
//!   only; probing continues with the rest.
//! - Zero probe successes means no commit call is ever issued and the
//!   record is failed with a probe summary.
//! - A rejected commit is terminal for the dispatch attempt; there is no
//!   fallback to the next candidate after a commit failure.
//! - Registry and store errors are hard errors and propagate to the caller
//!   instead of being folded into the record.

use anyhow::bail;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use hwbroker_types::{
    AllocationRecord, AllocationRequest, AllocationUpdate, CommittedMachine, HardwareDetail,
    ResourceManagerDescriptor,
};

use crate::registry::{Registry, RegistryError};
use crate::rm::{RmClient, RmDirectory, RmError};

/// Hard dispatch failures. RM-level failures never show up here; they end
/// as a persisted `failed` record instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The registry (or the store under it) failed.
    #[error("registry failure during dispatch: {0}")]
    Registry(#[from] RegistryError),
}

/// Orchestrates probe/commit dispatch for allocation requests.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    directory: RmDirectory,
    client: RmClient,
}

impl Dispatcher {
    pub fn new(registry: Registry, directory: RmDirectory, client: RmClient) -> Self {
        Self {
            registry,
            directory,
            client,
        }
    }

    /// Run one request to a terminal record.
    ///
    /// Returns the final record; its status says how dispatch ended. An
    /// `Err` means the broker itself failed (store/registry), not the RMs.
    pub async fn dispatch(
        &self,
        request: AllocationRequest,
    ) -> Result<AllocationRecord, DispatchError> {
        let allocation_id = request.allocation_id;
        let demands = request.demands.clone();

        // Persist before any RM contact so the record is observable even if
        // dispatch stalls below.
        self.registry.create(request).await?;
        info!(allocation_id = %allocation_id, "Allocation received, probing candidates");

        let candidates = self.directory.all().await.map_err(RegistryError::Store)?;

        // First probe success wins; the winner is the only RM we commit to.
        let mut probe_failures: Vec<serde_json::Value> = Vec::new();
        let mut winner: Option<ResourceManagerDescriptor> = None;
        for (name, rm) in candidates {
            match self.client.probe(&rm.endpoint, &demands).await {
                Ok(()) => {
                    info!(
                        allocation_id = %allocation_id,
                        resource_manager = %name,
                        endpoint = %rm.endpoint,
                        "Probe accepted"
                    );
                    winner = Some(rm);
                    break;
                }
                Err(e) if e.is_unreachable() => {
                    warn!(
                        allocation_id = %allocation_id,
                        resource_manager = %name,
                        error = %e,
                        "Candidate unreachable during probe"
                    );
                    probe_failures.push(json!({"resource_manager": name, "error": e.to_string()}));
                }
                Err(e) => {
                    info!(
                        allocation_id = %allocation_id,
                        resource_manager = %name,
                        error = %e,
                        "Candidate declined probe"
                    );
                    probe_failures.push(json!({"resource_manager": name, "error": e.to_string()}));
                }
            }
        }

        let Some(rm) = winner else {
            warn!(allocation_id = %allocation_id, "No candidate can fulfill the demands");
            let record = self
                .registry
                .update(
                    &allocation_id,
                    AllocationUpdate::failed(json!({
                        "error": "no resource manager can fulfill the demands",
                        "probes": probe_failures,
                    })),
                )
                .await?;
            return Ok(record);
        };

        match self.client.commit(&rm.endpoint, &demands).await {
            Ok(result) => match hardware_details(&result, &rm.endpoint) {
                Ok(details) => {
                    let record = self
                        .registry
                        .update(
                            &allocation_id,
                            AllocationUpdate::succeeded(rm.endpoint.clone(), details, result),
                        )
                        .await?;
                    info!(
                        allocation_id = %allocation_id,
                        resource_manager = %rm.endpoint,
                        machines = record.hardware_details.as_ref().map(Vec::len).unwrap_or(0),
                        "Allocation committed"
                    );
                    Ok(record)
                }
                Err(e) => {
                    error!(
                        allocation_id = %allocation_id,
                        resource_manager = %rm.endpoint,
                        error = %e,
                        "Commit response unusable"
                    );
                    let record = self
                        .registry
                        .update(
                            &allocation_id,
                            AllocationUpdate::failed(json!({
                                "error": e.to_string(),
                                "result": result,
                            })),
                        )
                        .await?;
                    Ok(record)
                }
            },
            Err(e) => {
                error!(
                    allocation_id = %allocation_id,
                    resource_manager = %rm.endpoint,
                    error = %e,
                    "Commit failed"
                );
                let record = self
                    .registry
                    .update(&allocation_id, AllocationUpdate::failed(commit_detail(&e)))
                    .await?;
                Ok(record)
            }
        }
    }
}

/// Map the RM's fulfillment payload to persisted hardware details, one entry
/// per machine in commit order.
fn hardware_details(
    result: &serde_json::Value,
    endpoint: &str,
) -> anyhow::Result<Vec<HardwareDetail>> {
    let Some(info) = result.get("info") else {
        bail!("commit response has no machine list");
    };
    let machines: Vec<CommittedMachine> = serde_json::from_value(info.clone())?;
    if machines.is_empty() {
        bail!("commit response lists no machines");
    }
    machines
        .iter()
        .map(|machine| {
            HardwareDetail::from_machine(machine, endpoint).ok_or_else(|| {
                anyhow::anyhow!("machine {} has no network interface", machine.name)
            })
        })
        .collect()
}

/// Audit detail persisted for a failed commit: the RM's error body plus the
/// HTTP status, or the transport error.
fn commit_detail(error: &RmError) -> serde_json::Value {
    match error {
        RmError::Rejected { status, body, .. } => {
            let detail: serde_json::Value =
                serde_json::from_str(body).unwrap_or_else(|_| json!(body));
            json!({"status": status.as_u16(), "detail": detail})
        }
        other => json!({"error": other.to_string()}),
    }
}
