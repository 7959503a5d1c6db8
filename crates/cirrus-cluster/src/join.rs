//! Per-service join payloads.

use serde::{Deserialize, Serialize};

/// One member-specific configuration entry handed to the hypervisor on join,
/// e.g. `storage-pool/local/source = /dev/disk/by-id/...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfigKey {
    pub entity: String,
    pub name: String,
    pub key: String,
    pub value: String,
}

impl MemberConfigKey {
    pub fn storage_pool(name: &str, key: &str, value: impl Into<String>) -> Self {
        Self {
            entity: "storage-pool".to_string(),
            name: name.to_string(),
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// A disk to add to the distributed storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRequest {
    pub path: String,
    pub wipe: bool,
}

/// Everything a service needs to join its cluster.
///
/// `JoinConfig::default()` is the zero value passed to services that were
/// requested without an explicit entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub token: String,
    #[serde(default)]
    pub hypervisor_config: Vec<MemberConfigKey>,
    #[serde(default)]
    pub storage_config: Vec<DiskRequest>,
}
