//! Error types for disk allocation.
//!
//! Every variant rejects the allocation as a whole; no partial assignment is
//! ever returned alongside one.

use thiserror::Error;

use cirrus_cluster::ServiceError;

use crate::MIN_DISTRIBUTED_PEERS;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("failed to get system resources of peer {peer:?}: {source}")]
    Resources {
        peer: String,
        #[source]
        source: ServiceError,
    },

    #[error("failed to check for {extension} extension: {source}")]
    Capability {
        extension: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("selected more than one local disk for peer {peer:?}")]
    MultipleLocalDisks { peer: String },

    #[error("some peers don't have a local disk selected: {}", .missing.join(", "))]
    LocalIncomplete { missing: Vec<String> },

    #[error("disk {path} is not available on peer {peer:?}")]
    DiskNotOffered { peer: String, path: String },

    #[error("disk {path} on peer {peer:?} is marked for wipe but not selected")]
    DiskNotSelected { peer: String, path: String },

    #[error("found no available disks")]
    NoDisks,

    #[error(
        "each peer (minimum {MIN_DISTRIBUTED_PEERS}) must have allocated disks, missing: {}",
        .missing.join(", ")
    )]
    Underrepresented { missing: Vec<String> },

    #[error("failed to add pending local storage pool on peer {peer:?}: {source}")]
    LocalPool {
        peer: String,
        #[source]
        source: ServiceError,
    },
}
