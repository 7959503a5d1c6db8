//! Error types for the cluster layer.

use thiserror::Error;

use crate::ServiceType;

/// Failure reported by a single backend service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to reach {socket}: {source}")]
    Unreachable {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to join {service} cluster: {source}")]
    JoinFailed {
        service: ServiceType,
        #[source]
        source: ServiceError,
    },

    #[error("concurrent task failed: {0}")]
    TaskFailed(String),
}

impl ClusterError {
    /// Service variant the error is attributed to, if any.
    pub fn service(&self) -> Option<ServiceType> {
        match self {
            ClusterError::JoinFailed { service, .. } => Some(*service),
            ClusterError::TaskFailed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_failure_names_service_in_lowercase() {
        let err = ClusterError::JoinFailed {
            service: ServiceType::Storage,
            source: ServiceError::Protocol("bad reply".into()),
        };
        assert_eq!(err.to_string(), "failed to join storage cluster: protocol error: bad reply");
        assert_eq!(err.service(), Some(ServiceType::Storage));
    }
}
