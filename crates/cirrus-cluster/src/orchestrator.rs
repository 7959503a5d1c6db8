//! Join orchestration across every registered backend service.
//!
//! Order is fixed: the coordinator joins first, the storage service second
//! (it has to be up before disks can be handed to anything else), and every
//! remaining service joins concurrently once both have succeeded.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::{ClusterError, JoinConfig, Service, ServiceHandler, ServiceType};

/// Services joined one after another, in this order, before the fan-out.
pub const SEQUENTIAL_JOIN_ORDER: [ServiceType; 2] = [ServiceType::Coordinator, ServiceType::Storage];

/// Drive every service registered in `handler` through its cluster join.
///
/// A sequential step that fails aborts the whole operation before anything
/// further is invoked. Concurrent joins all run to completion and the first
/// observed failure is returned. Registered services without an entry in
/// `configs` are joined with [`JoinConfig::default`]; services that are not
/// registered are never touched. Nothing is retried.
pub async fn join_services(
    handler: &ServiceHandler,
    configs: &BTreeMap<ServiceType, JoinConfig>,
) -> Result<(), ClusterError> {
    for service_type in SEQUENTIAL_JOIN_ORDER {
        match handler.get(service_type) {
            Some(service) => join_one(service.as_ref(), config_for(configs, service_type)).await?,
            None => debug!(service = %service_type, "service not requested, skipping"),
        }
    }

    handler
        .run_concurrent(|service| {
            let service_type = service.service_type();
            let config = config_for(configs, service_type);
            async move {
                // Already joined above.
                if SEQUENTIAL_JOIN_ORDER.contains(&service_type) {
                    return Ok(());
                }
                join_one(service.as_ref(), config).await
            }
        })
        .await
}

async fn join_one(service: &dyn Service, config: JoinConfig) -> Result<(), ClusterError> {
    let service_type = service.service_type();
    info!(service = %service_type, "joining cluster");
    service
        .join(config)
        .await
        .map_err(|source| ClusterError::JoinFailed { service: service_type, source })?;
    info!(service = %service_type, "joined cluster");
    Ok(())
}

fn config_for(configs: &BTreeMap<ServiceType, JoinConfig>, service: ServiceType) -> JoinConfig {
    configs.get(&service).cloned().unwrap_or_default()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
