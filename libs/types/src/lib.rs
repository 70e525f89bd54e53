//! # hwbroker-types
//!
//! Shared type definitions and serialization for the hwbroker platform.
//!
//! ## Design Principles
//!
//! - Allocation ids are system-generated, typed, and immutable once assigned
//! - Records evolve only through closed, typed partial updates
//! - Wire payloads tolerate unknown fields (resource managers evolve
//!   independently of the broker)
//! - Every payload that crosses the store or an RM endpoint is UTF-8 JSON
//!
//! ## Contents
//!
//! - Typed ids ([`AllocationId`])
//! - The allocation lifecycle model ([`AllocationRecord`], [`AllocationStatus`],
//!   [`AllocationUpdate`], [`HardwareDetail`])
//! - Resource manager wire payloads ([`ResourceManagerDescriptor`],
//!   [`CommittedMachine`])
//! - Store key and notification channel naming ([`keys`])

mod error;
mod id;
pub mod keys;
mod record;
mod rm;

pub use error::IdError;
pub use id::AllocationId;
pub use record::{
    AllocationRecord, AllocationRequest, AllocationStatus, AllocationUpdate, HardwareDetail,
    QueueState, QueuedRequest,
};
pub use rm::{CommittedMachine, NetInterface, ResourceManagerDescriptor};
