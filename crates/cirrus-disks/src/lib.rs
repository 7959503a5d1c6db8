//! # cirrus-disks
//!
//! Splits the unpartitioned disks of every peer between two storage roles:
//!
//! - the **local** pool, exactly one disk per peer, visible only on that node;
//! - the **distributed** pool, every remaining selected disk, handed to the
//!   distributed storage service of the peer that owns it.
//!
//! [`allocate`] is deterministic for identical inputs and all-or-nothing: a
//! rejected allocation returns an [`AllocationError`] and no assignment.

pub mod engine;
pub mod error;
pub mod inventory;
pub mod selection;

pub use engine::{
    allocate, Allocation, LocalPoolBackend, LOCAL_POOL, MIN_DISTRIBUTED_PEERS, REMOTE_POOL,
    REMOTE_POOL_SOURCE, SOURCE_WIPE_EXTENSION,
};
pub use error::AllocationError;
pub use inventory::{collect_inventory, Disk, Inventory, Partition, ResourceSource, DISK_BY_ID};
pub use selection::{AllocationOptions, DiskRef, PoolChoice, SetupMode};
