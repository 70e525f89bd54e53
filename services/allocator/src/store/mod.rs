//! State store boundary.
//!
//! The broker treats its persistence engine as an opaque collaborator: a
//! keyed hash store with field-level get/set/delete plus a separate pub/sub
//! channel namespace. Business logic only ever sees the [`Store`] trait;
//! the Redis-backed implementation is wired up at startup and an in-memory
//! implementation backs tests and local development.
//!
//! Pub/sub is fan-out with at-most-once, non-durable delivery: every
//! subscriber of a channel receives every message published after it joined,
//! and nothing from before.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to establish a store connection.
    #[error("failed to connect to store: {0}")]
    Connect(#[source] ::redis::RedisError),

    /// A store command failed after the connection was established.
    #[error("store command failed: {0}")]
    Command(#[source] ::redis::RedisError),
}

/// Opaque keyed hash store plus pub/sub bus.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read one field of a hash.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Write one field of a hash, creating the hash if needed.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Read a full hash. Bounded by store size; callers accept that.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Remove named fields from a hash, returning how many existed.
    async fn hash_del(&self, key: &str, fields: &[String]) -> Result<u64, StoreError>;

    /// Publish a payload to a channel. Delivery is fire-and-forget.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribe to a channel. Only messages published after the
    /// subscription is established are delivered.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;
}

/// A live pub/sub subscription.
///
/// Dropping the subscription ends it; subscribers must tolerate missed
/// messages (there is no replay).
pub struct Subscription {
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next payload, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
