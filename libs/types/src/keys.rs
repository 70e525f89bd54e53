//! Store key and notification channel naming.
//!
//! The store namespace is shared with the front end and any subscriber
//! tooling, so the names are fixed here rather than scattered as literals.

use crate::id::AllocationId;

/// Hash of allocation id → serialized [`crate::AllocationRecord`].
pub const ALLOCATIONS_KEY: &str = "allocations";

/// Hash of name → serialized [`crate::ResourceManagerDescriptor`].
/// Read-only from the broker's perspective.
pub const RESOURCE_MANAGERS_KEY: &str = "resource_managers";

/// Hash of allocation id → serialized [`crate::QueuedRequest`] (intake queue).
pub const QUEUE_KEY: &str = "jobs";

/// Broadcast channel receiving every created record.
pub const BROADCAST_CHANNEL: &str = "jobs";

/// Per-allocation notification channel.
pub fn allocation_channel(id: &AllocationId) -> String {
    format!("j:{id}")
}
