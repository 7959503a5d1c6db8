//! Shared-secret authentication for the network API.
//!
//! Requests arriving on the local control socket are trusted. Everything else
//! must carry the discovery-time secret in the `X-Cirrus-Auth` header. The
//! secret is compared through [`AuthSecret::matches`] and never logged.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use cirrus_cluster::AuthSecret;

use crate::api::error_response;

/// Header carrying the shared secret. Header names are case-insensitive.
pub const AUTH_HEADER: &str = "x-cirrus-auth";

/// Transport a request arrived on, attached per listener as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Unix control socket; filesystem permissions already gate access.
    Local,
    Network,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("request is missing the {AUTH_HEADER} header")]
    Missing,

    #[error("node has no authentication secret configured")]
    Unconfigured,

    #[error("authentication failed")]
    Mismatch,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Missing | AuthError::Unconfigured => StatusCode::BAD_REQUEST,
            AuthError::Mismatch => StatusCode::FORBIDDEN,
        };
        error_response(status, self)
    }
}

/// Read-only check against this node's secret.
#[derive(Debug, Clone)]
pub struct AuthGate {
    secret: Option<AuthSecret>,
}

impl AuthGate {
    pub fn new(secret: Option<AuthSecret>) -> Self {
        if secret.is_some() {
            tracing::info!("network API authentication enabled");
        } else {
            warn!("no auth secret configured; network requests will be rejected");
        }
        Self { secret }
    }

    /// Decide whether a request may proceed.
    ///
    /// Checked in order: origin, secret configured, header presence, match.
    /// A node without a secret rejects every network request as
    /// unconfigured, whatever the request carries.
    pub fn check(&self, origin: Origin, presented: Option<&[u8]>) -> Result<(), AuthError> {
        if origin == Origin::Local {
            return Ok(());
        }

        let Some(secret) = &self.secret else {
            return Err(AuthError::Unconfigured);
        };

        let presented = match presented {
            Some(value) if !value.is_empty() => value,
            _ => return Err(AuthError::Missing),
        };

        if secret.matches(presented) {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }
}

/// Axum middleware enforcing [`AuthGate::check`] on every routed request.
///
/// A request without an [`Origin`] extension is treated as network traffic.
pub async fn require_secret(State(gate): State<Arc<AuthGate>>, request: Request, next: Next) -> Response {
    let origin = request.extensions().get::<Origin>().copied().unwrap_or(Origin::Network);
    let presented = request.headers().get(AUTH_HEADER).map(|v| v.as_bytes());

    match gate.check(origin, presented) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            debug!(method = %request.method(), path = %request.uri().path(), error = %e, "request rejected");
            e.into_response()
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
