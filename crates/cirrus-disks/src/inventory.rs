//! Per-peer disk inventory.
//!
//! Only unpartitioned disks ever enter an [`Inventory`]; a disk carrying any
//! partition is dropped on insertion and can never be selected for a pool.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cirrus_cluster::{Peer, ServiceError};

use crate::AllocationError;

/// Stable device directory used to address disks across reboots.
pub const DISK_BY_ID: &str = "/dev/disk/by-id";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    #[serde(default)]
    pub id: String,
}

/// A physical disk as reported by a peer's resource API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub device_id: String,
    #[serde(default)]
    pub model: String,
    /// Capacity in bytes.
    #[serde(default)]
    pub size: u64,
    /// Disk class, e.g. `"nvme"`, `"scsi"`.
    #[serde(default, rename = "type")]
    pub disk_type: String,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl Disk {
    pub fn device_path(&self) -> String {
        format!("{DISK_BY_ID}/{}", self.device_id)
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
    }
}

/// Eligible disks of every peer, keyed by peer name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    peers: BTreeMap<String, Vec<Disk>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `disks` for `peer`, keeping inventory order and dropping any
    /// partitioned disk. A peer with no eligible disk is still recorded.
    pub fn insert(&mut self, peer: impl Into<String>, disks: Vec<Disk>) {
        let peer = peer.into();
        let total = disks.len();
        let eligible: Vec<Disk> = disks.into_iter().filter(|d| !d.is_partitioned()).collect();
        debug!(peer = %peer, total, eligible = eligible.len(), "inventory recorded");
        self.peers.insert(peer, eligible);
    }

    pub fn with_peer(mut self, peer: impl Into<String>, disks: Vec<Disk>) -> Self {
        self.insert(peer, disks);
        self
    }

    /// Peers in name order with their eligible disks.
    pub fn peers(&self) -> impl Iterator<Item = (&str, &[Disk])> {
        self.peers.iter().map(|(p, d)| (p.as_str(), d.as_slice()))
    }

    pub fn disks(&self, peer: &str) -> &[Disk] {
        self.peers.get(peer).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains_peer(&self, peer: &str) -> bool {
        self.peers.contains_key(peer)
    }

    /// `true` when `path` is an eligible disk of `peer`.
    pub fn offers(&self, peer: &str, path: &str) -> bool {
        self.disks(peer).iter().any(|d| d.device_path() == path)
    }

    /// Number of peers, including those without eligible disks.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// ─────────────────────────────────────────────
// Collection
// ─────────────────────────────────────────────

/// Anything that can list the physical disks of a peer.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn disks(&self, peer: &Peer) -> Result<Vec<Disk>, ServiceError>;
}

/// Query every peer in turn and build the eligible-disk inventory.
pub async fn collect_inventory(source: &dyn ResourceSource, peers: &[Peer]) -> Result<Inventory, AllocationError> {
    let mut inventory = Inventory::new();
    for peer in peers {
        let disks = source
            .disks(peer)
            .await
            .map_err(|source| AllocationError::Resources { peer: peer.name.clone(), source })?;
        inventory.insert(peer.name.clone(), disks);
    }
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(id: &str) -> Disk {
        Disk {
            device_id: id.to_string(),
            model: "QEMU HARDDISK".to_string(),
            size: 10 * 1024 * 1024 * 1024,
            disk_type: "scsi".to_string(),
            partitions: Vec::new(),
        }
    }

    #[test]
    fn partitioned_disks_are_never_eligible() {
        let mut used = disk("used");
        used.partitions.push(Partition { id: "used-part1".into() });

        let inventory = Inventory::new().with_peer("a", vec![disk("d1"), used, disk("d2")]);

        let ids: Vec<&str> = inventory.disks("a").iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
        assert!(!inventory.offers("a", "/dev/disk/by-id/used"));
        assert!(inventory.offers("a", "/dev/disk/by-id/d2"));
    }

    #[test]
    fn peers_without_disks_still_count() {
        let inventory = Inventory::new().with_peer("a", vec![]).with_peer("b", vec![disk("d1")]);
        assert_eq!(inventory.len(), 2);
        assert!(inventory.disks("a").is_empty());
        assert!(inventory.disks("missing").is_empty());
    }

    #[test]
    fn disk_deserializes_from_resource_api() {
        let raw = serde_json::json!({
            "device_id": "scsi-0QEMU_QEMU_HARDDISK_lxd_disk1",
            "model": "QEMU HARDDISK",
            "size": 10737418240u64,
            "type": "scsi",
            "partitions": [{"id": "sda1"}]
        });
        let disk: Disk = serde_json::from_value(raw).unwrap();
        assert_eq!(disk.disk_type, "scsi");
        assert!(disk.is_partitioned());
        assert_eq!(disk.device_path(), "/dev/disk/by-id/scsi-0QEMU_QEMU_HARDDISK_lxd_disk1");
    }

    struct FixedSource;

    #[async_trait]
    impl ResourceSource for FixedSource {
        async fn disks(&self, peer: &Peer) -> Result<Vec<Disk>, ServiceError> {
            match peer.name.as_str() {
                "broken" => Err(ServiceError::Protocol("no resources".into())),
                _ => Ok(vec![disk(&format!("{}-d1", peer.name))]),
            }
        }
    }

    #[tokio::test]
    async fn collect_wraps_failures_with_peer() {
        let peers = vec![Peer::local("a", "10.0.0.1:9443"), Peer::new("broken", "10.0.0.2:9443", None)];

        let err = collect_inventory(&FixedSource, &peers).await.unwrap_err();

        assert!(matches!(err, AllocationError::Resources { ref peer, .. } if peer == "broken"));
    }

    #[tokio::test]
    async fn collect_builds_inventory_per_peer() {
        let peers = vec![Peer::local("a", "10.0.0.1:9443"), Peer::new("b", "10.0.0.2:9443", None)];

        let inventory = collect_inventory(&FixedSource, &peers).await.unwrap();

        assert_eq!(inventory.len(), 2);
        assert!(inventory.offers("b", "/dev/disk/by-id/b-d1"));
    }
}
