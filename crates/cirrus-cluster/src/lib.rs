//! # cirrus-cluster
//!
//! Service model and join orchestration for a Cirrus node:
//!
//! - [`Service`] / [`ServiceType`]: the closed set of clustered backends
//! - [`ServiceHandler`]: per-invocation registry of those backends
//! - [`join_services`]: ordered, partially concurrent cluster join
//! - [`AuthSecret`] / [`Peer`]: discovery-time identity handed in by the caller
//!
//! Discovery itself and each backend's clustering logic live elsewhere; this
//! crate only sequences calls into them.

pub mod error;
pub mod handler;
pub mod join;
pub mod orchestrator;
pub mod peer;
pub mod secret;
pub mod service;

pub use error::{ClusterError, ServiceError};
pub use handler::{fan_out, ServiceHandler};
pub use join::{DiskRequest, JoinConfig, MemberConfigKey};
pub use orchestrator::{join_services, SEQUENTIAL_JOIN_ORDER};
pub use peer::Peer;
pub use secret::AuthSecret;
pub use service::{Service, ServiceType};
