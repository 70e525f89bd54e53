//! Notification bridge.
//!
//! Republishes registry mutations over the store's pub/sub bus: every
//! mutation goes to the channel named after the allocation id, and every
//! create additionally goes to the broadcast channel for subscribers that
//! want the full stream.
//!
//! Delivery is fire-and-forget. A failed publish is logged and swallowed;
//! notification must never fail or delay a registry write, and subscribers
//! already have to tolerate missed messages.

use std::sync::Arc;

use tracing::warn;

use hwbroker_types::keys::{allocation_channel, BROADCAST_CHANNEL};
use hwbroker_types::AllocationRecord;

use crate::store::Store;

/// Publisher half of the notification bridge.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Announce a freshly created record on its own channel and the
    /// broadcast channel.
    pub async fn created(&self, record: &AllocationRecord) {
        let Some(payload) = self.encode(record) else {
            return;
        };
        self.publish(&allocation_channel(&record.allocation_id), &payload)
            .await;
        self.publish(BROADCAST_CHANNEL, &payload).await;
    }

    /// Announce an updated record on its own channel.
    pub async fn updated(&self, record: &AllocationRecord) {
        let Some(payload) = self.encode(record) else {
            return;
        };
        self.publish(&allocation_channel(&record.allocation_id), &payload)
            .await;
    }

    fn encode(&self, record: &AllocationRecord) -> Option<String> {
        match serde_json::to_string(record) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(
                    allocation_id = %record.allocation_id,
                    error = %e,
                    "Failed to serialize record for notification"
                );
                None
            }
        }
    }

    async fn publish(&self, channel: &str, payload: &str) {
        if let Err(e) = self.store.publish(channel, payload).await {
            warn!(channel = %channel, error = %e, "Failed to publish notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use serde_json::json;

    use hwbroker_types::AllocationRequest;

    use crate::store::MemoryStore;

    fn record() -> AllocationRecord {
        AllocationRecord::new(AllocationRequest::new(json!({"cpu": 4})), Utc::now())
    }

    #[tokio::test]
    async fn test_create_reaches_id_channel_and_broadcast() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store.clone());
        let record = record();

        let mut id_sub = store
            .subscribe(&allocation_channel(&record.allocation_id))
            .await
            .unwrap();
        let mut all_sub = store.subscribe(BROADCAST_CHANNEL).await.unwrap();

        notifier.created(&record).await;

        let from_id: AllocationRecord =
            serde_json::from_str(&id_sub.recv().await.unwrap()).unwrap();
        let from_all: AllocationRecord =
            serde_json::from_str(&all_sub.recv().await.unwrap()).unwrap();
        assert_eq!(from_id, record);
        assert_eq!(from_all, record);
    }

    #[tokio::test]
    async fn test_update_skips_broadcast() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store.clone());
        let record = record();

        let mut all_sub = store.subscribe(BROADCAST_CHANNEL).await.unwrap();
        notifier.updated(&record).await;

        let next =
            tokio::time::timeout(std::time::Duration::from_millis(50), all_sub.recv()).await;
        assert!(next.is_err());
    }
}
