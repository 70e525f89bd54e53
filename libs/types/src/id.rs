//! Typed allocation id.
//!
//! Allocation ids are random v4 UUIDs with a canonical lowercase hyphenated
//! string form. The type exists so an allocation id can never be mixed up
//! with a resource manager name or a raw store field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;

/// Unique identifier of one allocation request.
///
/// Generated by the broker at submission time and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(Uuid);

impl AllocationId {
    /// Generate a fresh, collision-resistant id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl FromStr for AllocationId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::parse_str(s).map_err(|_| IdError::InvalidAllocationId(s.to_string()))?;
        Ok(Self(uuid))
    }
}

impl From<Uuid> for AllocationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_display_parse_roundtrip() {
        let id = AllocationId::new();
        let parsed: AllocationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = "not-an-id".parse::<AllocationId>().unwrap_err();
        assert_eq!(err, IdError::InvalidAllocationId("not-an-id".to_string()));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id: AllocationId = "6f0e3c76-7c5a-4f35-9c2e-5b9f0a3d8e11".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"6f0e3c76-7c5a-4f35-9c2e-5b9f0a3d8e11\"");
    }

    proptest! {
        #[test]
        fn prop_roundtrip(raw in any::<u128>()) {
            let id = AllocationId::from(Uuid::from_u128(raw));
            let parsed: AllocationId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
