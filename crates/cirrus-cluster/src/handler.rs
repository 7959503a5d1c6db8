//! ServiceHandler: the per-invocation registry of backend services.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::warn;

use crate::{AuthSecret, ClusterError, Service, ServiceType};

// ─────────────────────────────────────────────
// ServiceHandler
// ─────────────────────────────────────────────

/// Registry of the services taking part in one bootstrap or join.
///
/// Keyed by [`ServiceType`], so there is at most one instance per variant.
/// Built fresh for every invocation and dropped with it; nothing here is
/// persisted.
#[derive(Clone)]
pub struct ServiceHandler {
    name: String,
    address: String,
    auth_secret: Option<AuthSecret>,
    services: BTreeMap<ServiceType, Arc<dyn Service>>,
}

impl ServiceHandler {
    pub fn new(name: impl Into<String>, address: impl Into<String>, auth_secret: Option<AuthSecret>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            auth_secret,
            services: BTreeMap::new(),
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_service(mut self, service: Arc<dyn Service>) -> Self {
        self.register(service);
        self
    }

    /// Register a service, replacing any previous instance of the same type.
    pub fn register(&mut self, service: Arc<dyn Service>) -> Option<Arc<dyn Service>> {
        self.services.insert(service.service_type(), service)
    }

    pub fn get(&self, service: ServiceType) -> Option<&Arc<dyn Service>> {
        self.services.get(&service)
    }

    pub fn contains(&self, service: ServiceType) -> bool {
        self.services.contains_key(&service)
    }

    /// Registered variants in stable order.
    pub fn service_types(&self) -> Vec<ServiceType> {
        self.services.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn auth_secret(&self) -> Option<&AuthSecret> {
        self.auth_secret.as_ref()
    }

    /// Run `f` against every registered service concurrently.
    ///
    /// See [`fan_out`] for the completion and error rules.
    pub async fn run_concurrent<F, Fut>(&self, f: F) -> Result<(), ClusterError>
    where
        F: FnMut(Arc<dyn Service>) -> Fut,
        Fut: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        fan_out(self.services.values().cloned(), f).await
    }
}

impl std::fmt::Debug for ServiceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandler")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("services", &self.service_types())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────
// Task group
// ─────────────────────────────────────────────

/// Spawn one task per service and wait for every one of them.
///
/// Non-cancelling: a failed task never aborts its siblings. The returned
/// error is the first failure the collector observes, which is best-effort
/// completion order rather than any priority between services. Later
/// failures are logged and dropped.
pub async fn fan_out<I, F, Fut>(services: I, mut f: F) -> Result<(), ClusterError>
where
    I: IntoIterator<Item = Arc<dyn Service>>,
    F: FnMut(Arc<dyn Service>) -> Fut,
    Fut: Future<Output = Result<(), ClusterError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for service in services {
        tasks.spawn(f(service));
    }

    let mut first: Option<ClusterError> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.unwrap_or_else(|e| Err(ClusterError::TaskFailed(e.to_string())));
        if let Err(err) = result {
            if first.is_none() {
                first = Some(err);
            } else {
                warn!(error = %err, "additional concurrent task failure");
            }
        }
    }

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::{JoinConfig, ServiceError};

    struct Noop(ServiceType);

    #[async_trait]
    impl Service for Noop {
        fn service_type(&self) -> ServiceType {
            self.0
        }

        async fn join(&self, _config: JoinConfig) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn full_handler() -> ServiceHandler {
        ServiceType::ALL
            .into_iter()
            .fold(ServiceHandler::new("node-a", "10.0.0.1:9443", None), |h, t| h.with_service(Arc::new(Noop(t))))
    }

    #[test]
    fn registry_is_keyed_by_variant() {
        let mut handler = ServiceHandler::new("node-a", "10.0.0.1:9443", None);
        assert!(handler.register(Arc::new(Noop(ServiceType::Network))).is_none());
        assert!(handler.register(Arc::new(Noop(ServiceType::Network))).is_some());
        assert_eq!(handler.len(), 1);
        assert!(handler.contains(ServiceType::Network));
        assert!(!handler.contains(ServiceType::Storage));
    }

    #[test]
    fn debug_hides_secret() {
        let handler = ServiceHandler::new("node-a", "10.0.0.1:9443", Some(AuthSecret::new("topsecret")));
        assert!(!format!("{handler:?}").contains("topsecret"));
    }

    #[tokio::test]
    async fn run_concurrent_visits_every_service() {
        let handler = full_handler();
        let visits = Arc::new(AtomicUsize::new(0));

        handler
            .run_concurrent(|_service| {
                let visits = Arc::clone(&visits);
                async move {
                    visits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(visits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn panicking_task_is_reported_after_all_finish() {
        let handler = full_handler();
        let finished = Arc::new(AtomicUsize::new(0));

        let result = handler
            .run_concurrent(|service| {
                let finished = Arc::clone(&finished);
                async move {
                    if service.service_type() == ServiceType::Storage {
                        panic!("storage task exploded");
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(ClusterError::TaskFailed(_))));
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }
}
