//! Resource manager wire payloads.
//!
//! Resource managers are black boxes honoring the dispatch protocol; their
//! payloads tolerate unknown fields so the broker never breaks when an RM
//! adds information.

use serde::{Deserialize, Serialize};

use crate::record::HardwareDetail;

/// A registered resource manager, read from the store's directory hash.
///
/// The broker never creates or mutates these; registration is handled
/// elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceManagerDescriptor {
    /// Directory key. May be absent in the stored payload, in which case the
    /// hash field name is authoritative.
    #[serde(default)]
    pub name: String,
    /// `host:port` the dispatch protocol is spoken against.
    pub endpoint: String,
    /// Opaque capability advertisement, uninterpreted by the broker.
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

/// One network interface of a committed machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetInterface {
    pub ip: String,
}

/// One machine from a resource manager's commit response (`info` entries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedMachine {
    pub name: String,
    #[serde(default)]
    pub net_ifaces: Vec<NetInterface>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub pem_key_string: Option<String>,
    #[serde(default)]
    pub key_file_path: Option<String>,
}

impl CommittedMachine {
    /// Address of the first network interface, if the RM reported any.
    pub fn primary_ip(&self) -> Option<&str> {
        self.net_ifaces.first().map(|iface| iface.ip.as_str())
    }
}

impl HardwareDetail {
    /// Map a committed machine to the persisted access descriptor.
    ///
    /// Returns `None` when the machine has no network interface; a machine
    /// that cannot be addressed is not a usable fulfillment.
    pub fn from_machine(machine: &CommittedMachine, resource_manager_ep: &str) -> Option<Self> {
        Some(Self {
            ip: machine.primary_ip()?.to_string(),
            user: machine.user.clone(),
            password: machine.password.clone(),
            pem_key_string: machine.pem_key_string.clone(),
            keyfile_path: machine.key_file_path.clone(),
            resource_manager_ep: resource_manager_ep.to_string(),
            vm_id: machine.name.clone(),
        })
    }
}
