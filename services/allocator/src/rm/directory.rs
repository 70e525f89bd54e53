//! Read-only view of the registered resource managers.
//!
//! Registration itself is out of scope; some other process maintains the
//! store's directory hash and the broker only reads snapshots of it. The
//! snapshot carries no ordering, so candidate iteration is an unordered
//! set walk.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use hwbroker_types::keys::RESOURCE_MANAGERS_KEY;
use hwbroker_types::ResourceManagerDescriptor;

use crate::store::{Store, StoreError};

#[derive(Clone)]
pub struct RmDirectory {
    store: Arc<dyn Store>,
}

impl RmDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Snapshot of all registered managers, keyed by name. Undecodable
    /// entries are skipped with a warning.
    pub async fn all(&self) -> Result<HashMap<String, ResourceManagerDescriptor>, StoreError> {
        let raw = self.store.hash_get_all(RESOURCE_MANAGERS_KEY).await?;
        let mut managers = HashMap::with_capacity(raw.len());
        for (name, value) in raw {
            match serde_json::from_str::<ResourceManagerDescriptor>(&value) {
                Ok(mut rm) => {
                    // The hash field is authoritative for the name.
                    rm.name = name.clone();
                    managers.insert(name, rm);
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "Skipping undecodable resource manager");
                }
            }
        }
        Ok(managers)
    }

    /// A single manager by name.
    pub async fn get(
        &self,
        name: &str,
    ) -> Result<Option<ResourceManagerDescriptor>, StoreError> {
        let Some(raw) = self.store.hash_get(RESOURCE_MANAGERS_KEY, name).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<ResourceManagerDescriptor>(&raw) {
            Ok(mut rm) => {
                rm.name = name.to_string();
                Ok(Some(rm))
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Undecodable resource manager");
                Ok(None)
            }
        }
    }
}
