//! Backend service adapters.
//!
//! [`SocketService`] drives one backend's cluster join over its control
//! socket. [`Hypervisor`] exposes the hypervisor calls the disk allocator
//! needs: the capability query, pending local pool creation and per-peer
//! resource inventories.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use cirrus_cluster::{JoinConfig, Peer, Service, ServiceError, ServiceType};
use cirrus_disks::{Disk, LocalPoolBackend, ResourceSource, LOCAL_POOL};

use crate::backend::{self, BackendClient};
use crate::proxy::API_PREFIX;

// ─────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────

/// Builds the [`Service`] instances registered for one join request.
pub trait ServiceFactory: Send + Sync {
    fn service(&self, service: ServiceType, name: &str, address: &str) -> Arc<dyn Service>;
}

/// Factory for services reached through their unix control sockets.
#[derive(Debug, Clone, Default)]
pub struct SocketServiceFactory {
    overrides: BTreeMap<ServiceType, PathBuf>,
}

impl SocketServiceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `socket` for `service` instead of its fixed path.
    pub fn with_socket(mut self, service: ServiceType, socket: impl Into<PathBuf>) -> Self {
        self.overrides.insert(service, socket.into());
        self
    }

    fn socket(&self, service: ServiceType) -> PathBuf {
        self.overrides
            .get(&service)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(backend::socket_for(service)))
    }
}

impl ServiceFactory for SocketServiceFactory {
    fn service(&self, service: ServiceType, name: &str, address: &str) -> Arc<dyn Service> {
        Arc::new(SocketService {
            service_type: service,
            name: name.to_string(),
            address: address.to_string(),
            client: BackendClient::unix(self.socket(service)),
        })
    }
}

// ─────────────────────────────────────────────
// SocketService
// ─────────────────────────────────────────────

pub struct SocketService {
    service_type: ServiceType,
    name: String,
    address: String,
    client: BackendClient,
}

impl SocketService {
    /// Hypervisor join: enable clustering on the member with its member config.
    async fn join_hypervisor(&self, config: &JoinConfig) -> Result<(), ServiceError> {
        let body = json!({
            "server_name": self.name,
            "enabled": true,
            "cluster_address": self.address,
            "cluster_token": config.token,
            "member_config": config.hypervisor_config,
        });

        let response = self.client.request(Method::PUT, "/1.0/cluster", Some(body)).await?;
        if response.get("type").and_then(Value::as_str) == Some("async") {
            let operation = response
                .get("operation")
                .and_then(Value::as_str)
                .ok_or_else(|| ServiceError::Protocol("async response without operation".to_string()))?;
            wait_operation(&self.client, operation).await?;
        }
        Ok(())
    }

    /// Cluster-daemon style join shared by the coordinator, storage and network.
    async fn join_member(&self, config: &JoinConfig) -> Result<(), ServiceError> {
        let body = json!({
            "name": self.name,
            "address": self.address,
            "join_token": config.token,
        });
        self.client.request(Method::POST, "/cluster/control", Some(body)).await?;
        Ok(())
    }

    async fn add_disks(&self, config: &JoinConfig) -> Result<(), ServiceError> {
        for disk in &config.storage_config {
            debug!(path = %disk.path, wipe = disk.wipe, "adding disk to distributed storage");
            self.client
                .request(Method::POST, "/1.0/disks", Some(json!({ "path": disk.path, "wipe": disk.wipe })))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Service for SocketService {
    fn service_type(&self) -> ServiceType {
        self.service_type
    }

    async fn join(&self, config: JoinConfig) -> Result<(), ServiceError> {
        match self.service_type {
            ServiceType::Hypervisor => self.join_hypervisor(&config).await,
            ServiceType::Storage => {
                self.join_member(&config).await?;
                self.add_disks(&config).await
            }
            ServiceType::Coordinator | ServiceType::Network => self.join_member(&config).await,
        }
    }
}

/// Block on a background operation and surface its own failure.
async fn wait_operation(client: &BackendClient, operation: &str) -> Result<(), ServiceError> {
    let waited = client.get(&format!("{operation}/wait")).await?;
    let metadata = &waited["metadata"];

    match metadata["status"].as_str() {
        Some("Success") => Ok(()),
        status => {
            let message = metadata["err"]
                .as_str()
                .filter(|e| !e.is_empty())
                .or(status)
                .unwrap_or("operation failed")
                .to_string();
            let code = metadata["status_code"].as_u64().and_then(|c| u16::try_from(c).ok()).unwrap_or(500);
            Err(ServiceError::Backend { status: code, message })
        }
    }
}

// ─────────────────────────────────────────────
// Hypervisor
// ─────────────────────────────────────────────

/// Driver of local pool storage on this node's hypervisor.
const LOCAL_POOL_DRIVER: &str = "zfs";

/// Hypervisor calls used while planning storage.
#[derive(Debug, Clone)]
pub struct Hypervisor {
    name: String,
    client: BackendClient,
}

impl Hypervisor {
    pub fn with_socket(name: impl Into<String>, socket: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), client: BackendClient::unix(socket) }
    }
}

#[async_trait]
impl LocalPoolBackend for Hypervisor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn has_extension(&self, extension: &str) -> Result<bool, ServiceError> {
        let server = self.client.get("/1.0").await?;
        let found = server["metadata"]["api_extensions"]
            .as_array()
            .is_some_and(|exts| exts.iter().any(|e| e.as_str() == Some(extension)));
        Ok(found)
    }

    async fn add_pending_local_pool(&self, source: &str, wipe: bool) -> Result<(), ServiceError> {
        let mut config = json!({ "source": source });
        if wipe {
            config["source.wipe"] = json!("true");
        }
        let body = json!({ "name": LOCAL_POOL, "driver": LOCAL_POOL_DRIVER, "config": config });

        self.client
            .request(Method::POST, &format!("/1.0/storage-pools?target={}", self.name), Some(body))
            .await?;
        info!(member = %self.name, source, wipe, "created pending local storage pool");
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Resources {
    #[serde(default)]
    storage: StorageResources,
}

#[derive(Debug, Default, Deserialize)]
struct StorageResources {
    #[serde(default)]
    disks: Vec<Disk>,
}

#[async_trait]
impl ResourceSource for Hypervisor {
    /// The local node is asked directly; remote peers through their
    /// authenticated proxy route to their own hypervisor.
    async fn disks(&self, peer: &Peer) -> Result<Vec<Disk>, ServiceError> {
        let response = if peer.name == self.name {
            self.client.get("/1.0/resources").await?
        } else {
            let secret = peer.auth_secret.as_ref().map(|s| s.expose().to_string());
            BackendClient::peer(&peer.address, secret)
                .get(&format!("{API_PREFIX}/hypervisor/1.0/resources"))
                .await?
        };

        let resources: Resources = serde_json::from_value(response["metadata"].clone())
            .map_err(|e| ServiceError::Protocol(format!("invalid resources from {}: {e}", peer.name)))?;
        Ok(resources.storage.disks)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
