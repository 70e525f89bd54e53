//! Allocation registry.
//!
//! Owns the canonical allocation record keyed by allocation id, backed by
//! the store's `allocations` hash. Enforces the status model at the type
//! level (updates are a closed set of fields) and stamps expiration on
//! every write. Every mutation is republished through the notification
//! bridge.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::warn;

use hwbroker_types::keys::ALLOCATIONS_KEY;
use hwbroker_types::{AllocationId, AllocationRecord, AllocationRequest, AllocationUpdate};

use crate::notify::Notifier;
use crate::store::{Store, StoreError};

/// Registry operation errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An allocation with this id already exists.
    #[error("allocation already exists: {0}")]
    DuplicateKey(AllocationId),

    /// No allocation with this id.
    #[error("allocation not found: {0}")]
    NotFound(AllocationId),

    /// The underlying store failed.
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    /// A stored record could not be decoded.
    #[error("malformed allocation record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The canonical allocation record owner.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn Store>,
    notifier: Notifier,
    ttl: Duration,
}

impl Registry {
    /// `ttl` is the record staleness window applied on every write.
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, ttl: std::time::Duration) -> Self {
        let ttl = Duration::from_std(ttl).expect("allocation TTL out of range");
        Self {
            store,
            notifier,
            ttl,
        }
    }

    fn fresh_expiration(&self) -> DateTime<Utc> {
        Utc::now() + self.ttl
    }

    /// Persist a new record with `status=received`.
    ///
    /// Fails with [`RegistryError::DuplicateKey`] if the id is already
    /// present; callers are expected to generate collision-resistant ids.
    pub async fn create(
        &self,
        request: AllocationRequest,
    ) -> Result<AllocationRecord, RegistryError> {
        let field = request.allocation_id.to_string();
        if self.store.hash_get(ALLOCATIONS_KEY, &field).await?.is_some() {
            return Err(RegistryError::DuplicateKey(request.allocation_id));
        }

        let record = AllocationRecord::new(request, self.fresh_expiration());
        self.write(&record).await?;
        self.notifier.created(&record).await;
        Ok(record)
    }

    /// Read one record.
    pub async fn get(&self, id: &AllocationId) -> Result<AllocationRecord, RegistryError> {
        let raw = self
            .store
            .hash_get(ALLOCATIONS_KEY, &id.to_string())
            .await?
            .ok_or(RegistryError::NotFound(*id))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Read every record. Entries that no longer decode are skipped with a
    /// warning so one corrupt record cannot take down bulk listing.
    pub async fn list(&self) -> Result<HashMap<AllocationId, AllocationRecord>, RegistryError> {
        let raw = self.store.hash_get_all(ALLOCATIONS_KEY).await?;
        let mut records = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            let id: AllocationId = match field.parse() {
                Ok(id) => id,
                Err(e) => {
                    warn!(field = %field, error = %e, "Skipping entry with malformed id");
                    continue;
                }
            };
            match serde_json::from_str(&value) {
                Ok(record) => {
                    records.insert(id, record);
                }
                Err(e) => {
                    warn!(allocation_id = %id, error = %e, "Skipping undecodable record");
                }
            }
        }
        Ok(records)
    }

    /// Shallow-merge a typed partial update over the current record and
    /// refresh its expiration.
    ///
    /// Read-modify-write without a lock: concurrent updates to the same id
    /// are last-write-wins per record. Accepted because an allocation id is
    /// one-shot (one id, one dispatch attempt), not structurally enforced.
    pub async fn update(
        &self,
        id: &AllocationId,
        update: AllocationUpdate,
    ) -> Result<AllocationRecord, RegistryError> {
        let mut record = self.get(id).await?;
        let previous_expiration = record.expiration;
        record.apply(update);
        // Expiration never moves backwards, even under clock skew.
        record.expiration = self.fresh_expiration().max(previous_expiration);

        self.write(&record).await?;
        self.notifier.updated(&record).await;
        Ok(record)
    }

    /// Remove records from the hash (administrative pruning; the lifecycle
    /// engine itself never deletes).
    pub async fn delete(&self, ids: &[AllocationId]) -> Result<u64, RegistryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let fields: Vec<String> = ids.iter().map(ToString::to_string).collect();
        Ok(self.store.hash_del(ALLOCATIONS_KEY, &fields).await?)
    }

    async fn write(&self, record: &AllocationRecord) -> Result<(), RegistryError> {
        let payload = serde_json::to_string(record)?;
        self.store
            .hash_set(ALLOCATIONS_KEY, &record.allocation_id.to_string(), &payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use hwbroker_types::keys::allocation_channel;
    use hwbroker_types::{AllocationStatus, HardwareDetail};

    use crate::store::MemoryStore;

    fn registry() -> (Registry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store.clone());
        (
            Registry::new(store.clone(), notifier, std::time::Duration::from_secs(60)),
            store,
        )
    }

    fn request() -> AllocationRequest {
        AllocationRequest::new(json!({"cpu": 4}))
    }

    #[tokio::test]
    async fn test_create_then_get_returns_received_record() {
        let (registry, _) = registry();
        let created = registry.create(request()).await.unwrap();

        let fetched = registry.get(&created.allocation_id).await.unwrap();
        assert_eq!(fetched.status, AllocationStatus::Received);
        assert!(fetched.expiration > Utc::now());
        assert!(fetched.resource_manager.is_none());
        assert!(fetched.hardware_details.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let (registry, _) = registry();
        let req = request();
        registry.create(req.clone()).await.unwrap();

        let err = registry.create(req.clone()).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey(id) if id == req.allocation_id));
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_not_found() {
        let (registry, _) = registry();
        let id = AllocationId::new();
        let err = registry.get(&id).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_get_is_idempotent_without_writes() {
        let (registry, _) = registry();
        let created = registry.create(request()).await.unwrap();

        let first = registry.get(&created.allocation_id).await.unwrap();
        let second = registry.get(&created.allocation_id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_refreshes_expiration() {
        let (registry, _) = registry();
        let created = registry.create(request()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let updated = registry
            .update(
                &created.allocation_id,
                AllocationUpdate::failed(json!({"error": "no capacity"})),
            )
            .await
            .unwrap();

        assert!(updated.expiration > created.expiration);
        assert_eq!(updated.status, AllocationStatus::Failed);
        assert_eq!(updated.result, Some(json!({"error": "no capacity"})));
        // Untouched fields survive the merge.
        assert_eq!(updated.demands, json!({"cpu": 4}));
    }

    #[tokio::test]
    async fn test_update_success_carries_fulfillment_fields() {
        let (registry, _) = registry();
        let created = registry.create(request()).await.unwrap();

        let details = vec![HardwareDetail {
            ip: "10.0.0.5".to_string(),
            user: None,
            password: None,
            pem_key_string: None,
            keyfile_path: None,
            resource_manager_ep: "rm:8080".to_string(),
            vm_id: "vm-1".to_string(),
        }];
        let updated = registry
            .update(
                &created.allocation_id,
                AllocationUpdate::succeeded("rm:8080".to_string(), details.clone(), json!({})),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, AllocationStatus::Success);
        assert_eq!(updated.resource_manager.as_deref(), Some("rm:8080"));
        assert_eq!(updated.hardware_details, Some(details));
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let (registry, _) = registry();
        let err = registry
            .update(&AllocationId::new(), AllocationUpdate::failed(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_skips_undecodable_entries() {
        let (registry, store) = registry();
        let created = registry.create(request()).await.unwrap();
        store
            .hash_set(ALLOCATIONS_KEY, &AllocationId::new().to_string(), "not json")
            .await
            .unwrap();

        let records = registry.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.contains_key(&created.allocation_id));
    }

    #[tokio::test]
    async fn test_delete_prunes_records() {
        let (registry, _) = registry();
        let a = registry.create(request()).await.unwrap();
        let b = registry.create(request()).await.unwrap();

        let removed = registry
            .delete(&[a.allocation_id, AllocationId::new()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        assert!(matches!(
            registry.get(&a.allocation_id).await.unwrap_err(),
            RegistryError::NotFound(_)
        ));
        assert!(registry.get(&b.allocation_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscriber_sees_exactly_one_update_message() {
        let (registry, store) = registry();
        let created = registry.create(request()).await.unwrap();

        let mut sub = store
            .subscribe(&allocation_channel(&created.allocation_id))
            .await
            .unwrap();
        let updated = registry
            .update(
                &created.allocation_id,
                AllocationUpdate::failed(json!({"error": "boom"})),
            )
            .await
            .unwrap();

        let published: AllocationRecord =
            serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(published, updated);

        let next = tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
        assert!(next.is_err());
    }
}
