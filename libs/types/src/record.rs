//! The allocation lifecycle model.
//!
//! An [`AllocationRequest`] is immutable input; the derived
//! [`AllocationRecord`] is the persisted record that evolves through
//! [`AllocationUpdate`]s until it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::AllocationId;

/// Lifecycle status of an allocation record.
///
/// Transitions are monotonic: `received` moves to exactly one of the
/// terminal states and never back without a fresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Persisted, no resource manager has committed yet.
    Received,
    /// Exactly one resource manager committed the allocation.
    Success,
    /// Dispatch ended without a committed allocation.
    Failed,
}

impl AllocationStatus {
    /// Returns true once no further transition is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationStatus::Received => write!(f, "received"),
            AllocationStatus::Success => write!(f, "success"),
            AllocationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A client's demand for hardware, as submitted.
///
/// `demands` is an opaque requirement blob interpreted by resource managers,
/// never by the broker. The request is immutable after creation; only the
/// derived [`AllocationRecord`] mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub allocation_id: AllocationId,
    pub demands: serde_json::Value,
}

impl AllocationRequest {
    /// Create a request with a freshly generated id.
    pub fn new(demands: serde_json::Value) -> Self {
        Self {
            allocation_id: AllocationId::new(),
            demands,
        }
    }
}

/// Per-machine access descriptor, populated on successful commit.
///
/// Credential fields are passed through from the committing resource manager
/// verbatim; absent fields stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareDetail {
    /// Address of the machine's first network interface.
    pub ip: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub pem_key_string: Option<String>,
    #[serde(default)]
    pub keyfile_path: Option<String>,
    /// Endpoint of the resource manager that provisioned this machine.
    pub resource_manager_ep: String,
    /// Machine name as reported by the resource manager.
    pub vm_id: String,
}

/// The persisted, evolving record for one allocation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub allocation_id: AllocationId,
    pub status: AllocationStatus,
    /// Absolute staleness deadline, refreshed to now + TTL on every update.
    pub expiration: DateTime<Utc>,
    pub demands: serde_json::Value,
    /// Endpoint of the committing resource manager; absent until success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_manager: Option<String>,
    /// One entry per provisioned machine, in the order the committing
    /// resource manager returned them; absent until success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_details: Option<Vec<HardwareDetail>>,
    /// Raw resource manager response, retained for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl AllocationRecord {
    /// Derive the initial record from a request.
    pub fn new(request: AllocationRequest, expiration: DateTime<Utc>) -> Self {
        Self {
            allocation_id: request.allocation_id,
            status: AllocationStatus::Received,
            expiration,
            demands: request.demands,
            resource_manager: None,
            hardware_details: None,
            result: None,
        }
    }

    /// Apply a typed partial update.
    ///
    /// Present fields fully replace the prior value; absent fields are
    /// untouched. Expiration refresh is the registry's responsibility.
    pub fn apply(&mut self, update: AllocationUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(resource_manager) = update.resource_manager {
            self.resource_manager = Some(resource_manager);
        }
        if let Some(hardware_details) = update.hardware_details {
            self.hardware_details = Some(hardware_details);
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
    }

    /// Whether the record is past its staleness deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// Closed set of updatable record fields.
///
/// Replaces open-ended field merging: anything not named here cannot be
/// written through the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationUpdate {
    pub status: Option<AllocationStatus>,
    pub resource_manager: Option<String>,
    pub hardware_details: Option<Vec<HardwareDetail>>,
    pub result: Option<serde_json::Value>,
}

impl AllocationUpdate {
    /// Update recording a committed allocation.
    pub fn succeeded(
        resource_manager: String,
        hardware_details: Vec<HardwareDetail>,
        result: serde_json::Value,
    ) -> Self {
        Self {
            status: Some(AllocationStatus::Success),
            resource_manager: Some(resource_manager),
            hardware_details: Some(hardware_details),
            result: Some(result),
        }
    }

    /// Update recording a terminal dispatch failure.
    pub fn failed(result: serde_json::Value) -> Self {
        Self {
            status: Some(AllocationStatus::Failed),
            result: Some(result),
            ..Self::default()
        }
    }
}

/// Intake-queue claim state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Waiting to be picked up by the allocator.
    Free,
    /// Claimed by an allocator pass.
    Dispatching,
}

/// An entry of the intake queue, written by the front end and drained by the
/// allocator's intake worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub state: QueueState,
    pub allocation_id: AllocationId,
    pub demands: serde_json::Value,
}

impl QueuedRequest {
    /// Convert a claimed queue entry into the request handed to dispatch.
    pub fn into_request(self) -> AllocationRequest {
        AllocationRequest {
            allocation_id: self.allocation_id,
            demands: self.demands,
        }
    }
}
