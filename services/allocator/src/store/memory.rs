//! In-memory store for tests and local development.
//!
//! Pub/sub is built on `tokio::sync::broadcast`, which matches the
//! collaborator's semantics: fan-out to every live subscriber, no history
//! for late joiners.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};

use super::{Store, StoreError, Subscription};

const CHANNEL_CAPACITY: usize = 64;

/// Store implementation holding everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.inner.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let hashes = self.inner.hashes.lock().await;
        Ok(hashes.get(key).and_then(|hash| hash.get(field)).cloned())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut hashes = self.inner.hashes.lock().await;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let hashes = self.inner.hashes.lock().await;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_del(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        let mut hashes = self.inner.hashes.lock().await;
        let Some(hash) = hashes.get_mut(key) else {
            return Ok(0);
        };
        let mut removed = 0;
        for field in fields {
            if hash.remove(field).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        // A send error only means there is no subscriber right now, which is
        // fine for at-most-once delivery.
        let _ = self.sender(channel).await.send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut source = self.sender(channel).await.subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    // Missed messages are allowed; keep draining.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let store = MemoryStore::new();
        store.hash_set("allocations", "a", "1").await.unwrap();
        store.hash_set("allocations", "b", "2").await.unwrap();

        assert_eq!(
            store.hash_get("allocations", "a").await.unwrap(),
            Some("1".to_string())
        );
        assert_eq!(store.hash_get("allocations", "missing").await.unwrap(), None);

        let all = store.hash_get_all("allocations").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"], "2");
    }

    #[tokio::test]
    async fn test_hash_del_counts_existing_fields() {
        let store = MemoryStore::new();
        store.hash_set("jobs", "a", "1").await.unwrap();
        let removed = store
            .hash_del("jobs", &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.hash_get("jobs", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_all_subscribers() {
        let store = MemoryStore::new();
        let mut first = store.subscribe("j:1").await.unwrap();
        let mut second = store.subscribe("j:1").await.unwrap();

        store.publish("j:1", "payload").await.unwrap();

        assert_eq!(first.recv().await.unwrap(), "payload");
        assert_eq!(second.recv().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_no_history() {
        let store = MemoryStore::new();
        store.publish("j:1", "before").await.unwrap();

        let mut sub = store.subscribe("j:1").await.unwrap();
        store.publish("j:1", "after").await.unwrap();

        assert_eq!(sub.recv().await.unwrap(), "after");
        // Nothing else pending.
        let next = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let store = MemoryStore::new();
        store.publish("jobs", "nobody listening").await.unwrap();
    }
}
