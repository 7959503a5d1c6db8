//! Disk allocation across the local and distributed storage roles.
//!
//! The allocator runs in three steps:
//!
//! 1. ask the hypervisor whether it can wipe pool sources;
//! 2. plan the local pool (one disk per peer, reserved) and then the
//!    distributed pool over whatever is left;
//! 3. only when both plans are valid, create the pending local pool on the
//!    executing peer.
//!
//! A rejected plan therefore leaves nothing behind on any peer.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::{debug, info};

use cirrus_cluster::{DiskRequest, MemberConfigKey, ServiceError};

use crate::{AllocationError, AllocationOptions, DiskRef, Inventory, PoolChoice, SetupMode};

/// Hypervisor API extension advertising `source.wipe` on storage pools.
pub const SOURCE_WIPE_EXTENSION: &str = "storage_pool_source_wipe";

pub const LOCAL_POOL: &str = "local";
pub const REMOTE_POOL: &str = "remote";

/// Source of the remote pool on members joining an existing cluster.
pub const REMOTE_POOL_SOURCE: &str = "cirrus_remote";

/// Below this many disk-owning peers the distributed pool may leave peers out.
pub const MIN_DISTRIBUTED_PEERS: usize = 3;

/// The hypervisor on the node running the allocation.
#[async_trait]
pub trait LocalPoolBackend: Send + Sync {
    /// Name of the node this backend runs on.
    fn name(&self) -> &str;

    async fn has_extension(&self, extension: &str) -> Result<bool, ServiceError>;

    /// Create the member-specific part of the `local` pool on this node.
    async fn add_pending_local_pool(&self, source: &str, wipe: bool) -> Result<(), ServiceError>;
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Hypervisor member config to embed in each remote peer's join payload.
    pub member_config: BTreeMap<String, Vec<MemberConfigKey>>,
    /// Disk reserved for the local pool, per peer (executing peer included).
    pub local_disks: BTreeMap<String, String>,
    /// Disks to hand to each peer's distributed storage service.
    pub distributed: BTreeMap<String, Vec<DiskRequest>>,
}

struct LocalPlan {
    selected: BTreeMap<String, String>,
    wipe: BTreeSet<String>,
}

/// Allocate disks from `inventory` according to `options`.
pub async fn allocate(
    backend: &dyn LocalPoolBackend,
    inventory: &Inventory,
    options: &AllocationOptions,
) -> Result<Allocation, AllocationError> {
    let wipeable = backend
        .has_extension(SOURCE_WIPE_EXTENSION)
        .await
        .map_err(|source| AllocationError::Capability { extension: SOURCE_WIPE_EXTENSION, source })?;

    let (local_choice, distributed_choice) = match &options.mode {
        SetupMode::Auto => (None, None),
        SetupMode::Interactive { local, distributed } => (Some(local), Some(distributed)),
    };

    let local = plan_local(inventory, local_choice, options.wipe_all, wipeable)?;
    let reserved = local.as_ref().map(|p| p.selected.clone()).unwrap_or_default();

    let distributed = if options.distributed {
        plan_distributed(inventory, &reserved, distributed_choice, options.wipe_all, wipeable)?
    } else {
        BTreeMap::new()
    };

    let mut allocation = Allocation::default();

    if let Some(plan) = local {
        for (peer, path) in &plan.selected {
            let wipe = plan.wipe.contains(peer);
            if peer == backend.name() {
                backend
                    .add_pending_local_pool(path, wipe)
                    .await
                    .map_err(|source| AllocationError::LocalPool { peer: peer.clone(), source })?;
                info!(peer = %peer, path = %path, wipe, "pending local storage pool added");
            } else {
                let mut keys = vec![MemberConfigKey::storage_pool(LOCAL_POOL, "source", path.as_str())];
                if wipe {
                    keys.push(MemberConfigKey::storage_pool(LOCAL_POOL, "source.wipe", "true"));
                }
                allocation.member_config.insert(peer.clone(), keys);
            }
        }
        allocation.local_disks = plan.selected;
    }

    if !options.bootstrap {
        for peer in distributed.keys() {
            allocation
                .member_config
                .entry(peer.clone())
                .or_default()
                .push(MemberConfigKey::storage_pool(REMOTE_POOL, "source", REMOTE_POOL_SOURCE));
        }
    }

    allocation.distributed = distributed;
    Ok(allocation)
}

// ─────────────────────────────────────────────
// Local pool
// ─────────────────────────────────────────────

fn plan_local(
    inventory: &Inventory,
    choice: Option<&PoolChoice>,
    wipe_all: bool,
    wipeable: bool,
) -> Result<Option<LocalPlan>, AllocationError> {
    let mut selected: BTreeMap<String, String> = BTreeMap::new();
    let mut wipe: BTreeSet<String> = BTreeSet::new();

    match choice {
        None => {
            for (peer, disks) in inventory.peers() {
                // Without a spare disk this peer could not contribute to the
                // distributed pool.
                if disks.len() < 2 {
                    info!(peer, "skipping local storage pool creation, peer has too few disks");
                    return Ok(None);
                }
                selected.insert(peer.to_string(), disks[0].device_path());
            }
        }
        Some(choice) if !choice.wanted => return Ok(None),
        Some(choice) => {
            for disk in &choice.selected {
                ensure_offered(inventory, disk)?;
                if selected.contains_key(&disk.peer) {
                    return Err(AllocationError::MultipleLocalDisks { peer: disk.peer.clone() });
                }
                selected.insert(disk.peer.clone(), disk.path.clone());
            }
            for disk in &choice.wipe {
                if selected.get(&disk.peer) != Some(&disk.path) {
                    return Err(AllocationError::DiskNotSelected { peer: disk.peer.clone(), path: disk.path.clone() });
                }
                wipe.insert(disk.peer.clone());
            }
        }
    }

    if selected.is_empty() {
        return Ok(None);
    }

    if selected.len() != inventory.len() {
        let missing = inventory
            .peers()
            .map(|(peer, _)| peer)
            .filter(|peer| !selected.contains_key(*peer))
            .map(str::to_string)
            .collect();
        return Err(AllocationError::LocalIncomplete { missing });
    }

    if wipe_all {
        wipe = selected.keys().cloned().collect();
    }
    if !wipeable {
        wipe.clear();
    }

    debug!(peers = selected.len(), wiped = wipe.len(), "local pool planned");
    Ok(Some(LocalPlan { selected, wipe }))
}

// ─────────────────────────────────────────────
// Distributed pool
// ─────────────────────────────────────────────

fn plan_distributed(
    inventory: &Inventory,
    reserved: &BTreeMap<String, String>,
    choice: Option<&PoolChoice>,
    wipe_all: bool,
    wipeable: bool,
) -> Result<BTreeMap<String, Vec<DiskRequest>>, AllocationError> {
    if choice.is_some_and(|c| !c.wanted) {
        return Ok(BTreeMap::new());
    }

    let offered: Vec<DiskRef> = inventory
        .peers()
        .flat_map(|(peer, disks)| disks.iter().map(move |d| DiskRef::new(peer, d.device_path())))
        .filter(|d| reserved.get(&d.peer) != Some(&d.path))
        .collect();

    if offered.is_empty() {
        return Err(AllocationError::NoDisks);
    }

    let (selected, to_wipe): (Vec<DiskRef>, BTreeSet<DiskRef>) = match choice {
        None => (offered.clone(), BTreeSet::new()),
        Some(choice) => {
            if let Some(disk) = choice.selected.iter().find(|d| !offered.contains(d)) {
                return Err(AllocationError::DiskNotOffered { peer: disk.peer.clone(), path: disk.path.clone() });
            }
            // Inventory order, not selection order, so equal choices give equal output.
            let selected: Vec<DiskRef> = offered.iter().filter(|d| choice.selected.contains(d)).cloned().collect();
            if let Some(disk) = choice.wipe.iter().find(|d| !selected.contains(d)) {
                return Err(AllocationError::DiskNotSelected { peer: disk.peer.clone(), path: disk.path.clone() });
            }
            (selected, choice.wipe.iter().cloned().collect())
        }
    };

    let mut disks: BTreeMap<String, Vec<DiskRequest>> = BTreeMap::new();
    for disk in selected {
        let wipe = wipeable && (wipe_all || to_wipe.contains(&disk));
        disks.entry(disk.peer).or_default().push(DiskRequest { path: disk.path, wipe });
    }

    let owners: BTreeSet<&str> = offered.iter().map(|d| d.peer.as_str()).collect();
    if owners.len() >= MIN_DISTRIBUTED_PEERS {
        let missing: Vec<String> = owners
            .into_iter()
            .filter(|peer| !disks.contains_key(*peer))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(AllocationError::Underrepresented { missing });
        }
    }

    debug!(peers = disks.len(), "distributed pool planned");
    Ok(disks)
}

fn ensure_offered(inventory: &Inventory, disk: &DiskRef) -> Result<(), AllocationError> {
    if inventory.offers(&disk.peer, &disk.path) {
        Ok(())
    } else {
        Err(AllocationError::DiskNotOffered { peer: disk.peer.clone(), path: disk.path.clone() })
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::Disk;

    struct FakeHypervisor {
        name: String,
        wipeable: bool,
        pools: Mutex<Vec<(String, bool)>>,
    }

    impl FakeHypervisor {
        fn new(name: &str, wipeable: bool) -> Self {
            Self { name: name.to_string(), wipeable, pools: Mutex::new(Vec::new()) }
        }

        fn pools(&self) -> Vec<(String, bool)> {
            self.pools.lock().clone()
        }
    }

    #[async_trait]
    impl LocalPoolBackend for FakeHypervisor {
        fn name(&self) -> &str {
            &self.name
        }

        async fn has_extension(&self, extension: &str) -> Result<bool, ServiceError> {
            Ok(self.wipeable && extension == SOURCE_WIPE_EXTENSION)
        }

        async fn add_pending_local_pool(&self, source: &str, wipe: bool) -> Result<(), ServiceError> {
            self.pools.lock().push((source.to_string(), wipe));
            Ok(())
        }
    }

    fn disk(id: &str) -> Disk {
        Disk { device_id: id.to_string(), model: "disk".into(), size: 1 << 34, disk_type: "nvme".into(), partitions: vec![] }
    }

    fn path(id: &str) -> String {
        format!("/dev/disk/by-id/{id}")
    }

    fn at(peer: &str, id: &str) -> DiskRef {
        DiskRef::new(peer, path(id))
    }

    fn inventory(peers: &[(&str, &[&str])]) -> Inventory {
        peers.iter().fold(Inventory::new(), |inv, (peer, ids)| {
            inv.with_peer(*peer, ids.iter().map(|id| disk(id)).collect())
        })
    }

    #[tokio::test]
    async fn auto_skips_local_pool_when_any_peer_lacks_a_spare() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["d1", "d2"]), ("b", &["d3"])]);

        let alloc = allocate(&backend, &inv, &AllocationOptions::auto(true)).await.unwrap();

        assert!(alloc.local_disks.is_empty());
        assert!(alloc.member_config.is_empty());
        assert!(backend.pools().is_empty());
        // Two disk owners: every disk goes to the distributed pool.
        assert_eq!(alloc.distributed["a"].len(), 2);
        assert_eq!(alloc.distributed["b"].len(), 1);
    }

    #[tokio::test]
    async fn auto_reserves_first_disk_per_peer() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1", "a2"]), ("b", &["b1", "b2"]), ("c", &["c1", "c2"])]);

        let alloc = allocate(&backend, &inv, &AllocationOptions::auto(true)).await.unwrap();

        assert_eq!(backend.pools(), vec![(path("a1"), false)]);
        assert_eq!(alloc.local_disks["b"], path("b1"));
        assert_eq!(
            alloc.member_config["b"],
            vec![MemberConfigKey::storage_pool(LOCAL_POOL, "source", path("b1"))]
        );
        assert!(!alloc.member_config.contains_key("a"));
        for (peer, disks) in &alloc.distributed {
            assert_eq!(disks.len(), 1);
            assert_ne!(Some(&disks[0].path), alloc.local_disks.get(peer));
        }
    }

    #[tokio::test]
    async fn three_single_disk_peers_all_selected() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1"]), ("b", &["b1"]), ("c", &["c1"])]);

        let alloc = allocate(&backend, &inv, &AllocationOptions::auto(true)).await.unwrap();

        assert_eq!(alloc.distributed.len(), 3);
        assert!(alloc.local_disks.is_empty());
    }

    #[tokio::test]
    async fn unrepresented_peer_rejects_whole_allocation() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1", "a2"]), ("b", &["b1", "b2"]), ("c", &["c1", "c2"])]);
        let options = AllocationOptions::interactive(
            PoolChoice::select(vec![at("a", "a1"), at("b", "b1"), at("c", "c1")]),
            PoolChoice::select(vec![at("a", "a2"), at("b", "b2")]),
            true,
        );

        let err = allocate(&backend, &inv, &options).await.unwrap_err();

        assert!(matches!(err, AllocationError::Underrepresented { ref missing } if missing == &["c".to_string()]));
        // Local plan was valid but must not have been applied.
        assert!(backend.pools().is_empty());
    }

    #[tokio::test]
    async fn fewer_than_three_owners_waives_representation() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1"]), ("b", &["b1"])]);
        let options = AllocationOptions::interactive(
            PoolChoice::declined(),
            PoolChoice::select(vec![at("a", "a1")]),
            true,
        );

        let alloc = allocate(&backend, &inv, &options).await.unwrap();

        assert_eq!(alloc.distributed.len(), 1);
        assert_eq!(alloc.distributed["a"], vec![DiskRequest { path: path("a1"), wipe: false }]);
    }

    #[tokio::test]
    async fn waiver_counts_disk_owners_not_peers() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1"]), ("b", &["b1"]), ("c", &[])]);
        let options = AllocationOptions::interactive(
            PoolChoice::declined(),
            PoolChoice::select(vec![at("a", "a1")]),
            true,
        );

        let alloc = allocate(&backend, &inv, &options).await.unwrap();

        assert_eq!(alloc.distributed.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn declined_local_storage_consumes_nothing() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1", "a2"]), ("b", &["b1", "b2"])]);
        let options = AllocationOptions::interactive(
            PoolChoice::declined(),
            PoolChoice::select(vec![at("a", "a1"), at("a", "a2"), at("b", "b1"), at("b", "b2")]),
            true,
        );

        let alloc = allocate(&backend, &inv, &options).await.unwrap();

        assert!(alloc.local_disks.is_empty());
        assert_eq!(alloc.distributed["a"].len() + alloc.distributed["b"].len(), 4);
    }

    #[tokio::test]
    async fn manual_local_rejects_two_disks_for_one_peer() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1", "a2"])]);
        let options = AllocationOptions::interactive(
            PoolChoice::select(vec![at("a", "a1"), at("a", "a2")]),
            PoolChoice::declined(),
            true,
        );

        let err = allocate(&backend, &inv, &options).await.unwrap_err();

        assert!(matches!(err, AllocationError::MultipleLocalDisks { ref peer } if peer == "a"));
    }

    #[tokio::test]
    async fn manual_local_requires_every_peer() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1", "a2"]), ("b", &["b1", "b2"])]);
        let options = AllocationOptions::interactive(
            PoolChoice::select(vec![at("a", "a1")]),
            PoolChoice::declined(),
            true,
        );

        let err = allocate(&backend, &inv, &options).await.unwrap_err();

        assert!(matches!(err, AllocationError::LocalIncomplete { ref missing } if missing == &["b".to_string()]));
    }

    #[tokio::test]
    async fn reserved_local_disk_cannot_be_pooled() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1", "a2"])]);
        let options = AllocationOptions::interactive(
            PoolChoice::select(vec![at("a", "a1")]),
            PoolChoice::select(vec![at("a", "a1")]),
            true,
        );

        let err = allocate(&backend, &inv, &options).await.unwrap_err();

        assert!(matches!(err, AllocationError::DiskNotOffered { .. }));
        assert!(backend.pools().is_empty());
    }

    #[tokio::test]
    async fn wipe_requires_backend_support() {
        let inv = inventory(&[("a", &["a1", "a2"]), ("b", &["b1", "b2"])]);
        let mut options = AllocationOptions::auto(true);
        options.wipe_all = true;

        let unsupported = FakeHypervisor::new("a", false);
        let alloc = allocate(&unsupported, &inv, &options).await.unwrap();
        assert_eq!(unsupported.pools(), vec![(path("a1"), false)]);
        assert!(alloc.member_config["b"].iter().all(|k| k.key != "source.wipe"));
        assert!(alloc.distributed.values().flatten().all(|d| !d.wipe));

        let supported = FakeHypervisor::new("a", true);
        let alloc = allocate(&supported, &inv, &options).await.unwrap();
        assert_eq!(supported.pools(), vec![(path("a1"), true)]);
        assert!(alloc.member_config["b"].contains(&MemberConfigKey::storage_pool(LOCAL_POOL, "source.wipe", "true")));
        assert!(alloc.distributed.values().flatten().all(|d| d.wipe));
    }

    #[tokio::test]
    async fn per_disk_wipe_choice() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1", "a2"])]);
        let options = AllocationOptions::interactive(
            PoolChoice::declined(),
            PoolChoice::select(vec![at("a", "a1"), at("a", "a2")]).with_wipe(vec![at("a", "a2")]),
            true,
        );

        let alloc = allocate(&backend, &inv, &options).await.unwrap();

        assert_eq!(
            alloc.distributed["a"],
            vec![DiskRequest { path: path("a1"), wipe: false }, DiskRequest { path: path("a2"), wipe: true }]
        );
    }

    #[tokio::test]
    async fn joining_peers_get_remote_pool_source() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("b", &["b1", "b2"]), ("c", &["c1", "c2"])]);

        let alloc = allocate(&backend, &inv, &AllocationOptions::auto(false)).await.unwrap();

        let remote = MemberConfigKey::storage_pool(REMOTE_POOL, "source", REMOTE_POOL_SOURCE);
        assert_eq!(alloc.member_config["b"].last(), Some(&remote));
        assert_eq!(alloc.member_config["c"].last(), Some(&remote));
        assert_eq!(alloc.member_config["b"][0].value, path("b1"));
    }

    #[tokio::test]
    async fn no_distributed_phase_without_storage_service() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &["a1"])]);
        let mut options = AllocationOptions::auto(true);
        options.distributed = false;

        let alloc = allocate(&backend, &inv, &options).await.unwrap();

        assert_eq!(alloc, Allocation::default());
    }

    #[tokio::test]
    async fn no_disks_left_rejects_distributed_pool() {
        let backend = FakeHypervisor::new("a", true);
        let inv = inventory(&[("a", &[]), ("b", &[])]);

        let err = allocate(&backend, &inv, &AllocationOptions::auto(true)).await.unwrap_err();

        assert!(matches!(err, AllocationError::NoDisks));
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_allocations() {
        let inv = inventory(&[("a", &["a1", "a2", "a3"]), ("b", &["b1", "b2"]), ("c", &["c1", "c2"])]);
        let options = AllocationOptions::interactive(
            PoolChoice::select(vec![at("c", "c2"), at("a", "a3"), at("b", "b1")]),
            PoolChoice::select(vec![at("b", "b2"), at("a", "a1"), at("c", "c1"), at("a", "a2")]),
            false,
        );

        let first = allocate(&FakeHypervisor::new("a", true), &inv, &options).await.unwrap();
        let second = allocate(&FakeHypervisor::new("a", true), &inv.clone(), &options.clone()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.distributed["a"][0].path, path("a1"));
    }
}
