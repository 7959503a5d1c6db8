//! Service: the capability set every clustered backend exposes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{JoinConfig, ServiceError};

// ─────────────────────────────────────────────
// ServiceType
// ─────────────────────────────────────────────

/// Closed set of backend services a Cirrus node coordinates.
///
/// The derived ordering is only used for stable iteration; join order is
/// decided by the orchestrator, not by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// The Cirrus cluster itself (membership database, peer trust).
    Coordinator,
    /// Distributed block storage.
    Storage,
    /// Software-defined networking.
    Network,
    /// Virtual machine / container hypervisor.
    Hypervisor,
}

impl ServiceType {
    pub const ALL: [ServiceType; 4] = [
        ServiceType::Coordinator,
        ServiceType::Storage,
        ServiceType::Network,
        ServiceType::Hypervisor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Coordinator => "coordinator",
            ServiceType::Storage     => "storage",
            ServiceType::Network     => "network",
            ServiceType::Hypervisor  => "hypervisor",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────

/// A backend service that can be driven through its own cluster join.
///
/// Timeouts are the implementation's business; callers await `join` to
/// completion.
#[async_trait]
pub trait Service: Send + Sync {
    fn service_type(&self) -> ServiceType;

    /// Join this node to the service's cluster using `config`.
    async fn join(&self, config: JoinConfig) -> Result<(), ServiceError>;
}
