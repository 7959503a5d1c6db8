//! Peer: a node taking part in cluster formation, as reported by discovery.

use crate::AuthSecret;

/// Identity of a peer plus the secret it announced during discovery.
///
/// Immutable once discovered.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Human-readable node name, unique within the cluster.
    pub name: String,

    /// API address, e.g. `"10.0.1.42:9443"`.
    pub address: String,

    /// Secret to present when calling this peer; `None` for the local node.
    pub auth_secret: Option<AuthSecret>,
}

impl Peer {
    pub fn new(name: impl Into<String>, address: impl Into<String>, auth_secret: Option<AuthSecret>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            auth_secret,
        }
    }

    /// A peer describing the node running this process.
    pub fn local(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(name, address, None)
    }
}
