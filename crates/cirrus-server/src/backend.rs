//! HTTP/1.1 client for backend control sockets and peer APIs.
//!
//! Every call opens its own connection; nothing is pooled or shared between
//! requests. Connections are driven with upgrades enabled so the proxy can
//! take over the raw stream after a `101 Switching Protocols`.

use std::path::{Path, PathBuf};

use axum::body::Body;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

use cirrus_cluster::{ServiceError, ServiceType};

/// Control socket of the local cluster coordinator daemon.
pub const COORDINATOR_SOCKET: &str = "/var/lib/cirrus/coordinator.socket";
pub const HYPERVISOR_SOCKET: &str = "/var/lib/cirrus-hypervisor/unix.socket";
pub const STORAGE_SOCKET: &str = "/var/lib/cirrus-storage/control.socket";
pub const NETWORK_SOCKET: &str = "/var/lib/cirrus-network/control.socket";

/// Largest backend response body read into memory by [`BackendClient`].
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

pub fn socket_for(service: ServiceType) -> &'static str {
    match service {
        ServiceType::Coordinator => COORDINATOR_SOCKET,
        ServiceType::Storage     => STORAGE_SOCKET,
        ServiceType::Network     => NETWORK_SOCKET,
        ServiceType::Hypervisor  => HYPERVISOR_SOCKET,
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

/// Open a fresh HTTP/1.1 connection to a unix control socket.
pub async fn connect_unix(socket: &Path) -> Result<SendRequest<Body>, ServiceError> {
    let stream = UnixStream::connect(socket)
        .await
        .map_err(|source| ServiceError::Unreachable { socket: socket.display().to_string(), source })?;
    handshake(stream).await
}

/// Open a fresh HTTP/1.1 connection to a peer's network API.
pub async fn connect_tcp(address: &str) -> Result<SendRequest<Body>, ServiceError> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|source| ServiceError::Unreachable { socket: address.to_string(), source })?;
    handshake(stream).await
}

async fn handshake<S>(stream: S) -> Result<SendRequest<Body>, ServiceError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, connection) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| ServiceError::Protocol(format!("handshake failed: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = connection.with_upgrades().await {
            debug!(error = %e, "backend connection closed with error");
        }
    });

    Ok(sender)
}

// ── JSON client ───────────────────────────────────────────────────────────────

/// Where a [`BackendClient`] sends its requests.
#[derive(Debug, Clone)]
enum Target {
    Unix(PathBuf),
    Tcp(String),
}

/// Small JSON client speaking the backends' REST dialect.
///
/// Responses are decoded as JSON; a non-2xx status becomes
/// [`ServiceError::Backend`] carrying the backend's `error` field.
#[derive(Debug, Clone)]
pub struct BackendClient {
    target: Target,
    auth_secret: Option<String>,
}

impl BackendClient {
    pub fn unix(socket: impl Into<PathBuf>) -> Self {
        Self { target: Target::Unix(socket.into()), auth_secret: None }
    }

    /// Client for a remote peer, authenticating with `secret`.
    pub fn peer(address: impl Into<String>, secret: Option<String>) -> Self {
        Self { target: Target::Tcp(address.into()), auth_secret: secret }
    }

    pub async fn send(&self, request: Request<Body>) -> Result<Response<Incoming>, ServiceError> {
        let mut sender = match &self.target {
            Target::Unix(socket) => connect_unix(socket).await?,
            Target::Tcp(address) => connect_tcp(address).await?,
        };
        sender
            .send_request(request)
            .await
            .map_err(|e| ServiceError::Protocol(format!("request failed: {e}")))
    }

    pub async fn get(&self, path: &str) -> Result<Value, ServiceError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ServiceError> {
        let mut builder = Request::builder().method(method.clone()).uri(path).header(HOST, "localhost");
        if let Some(secret) = &self.auth_secret {
            builder = builder.header(crate::auth::AUTH_HEADER, secret.as_str());
        }
        let request = match body {
            Some(json) => builder.header(CONTENT_TYPE, "application/json").body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .map_err(|e| ServiceError::Protocol(format!("invalid request {method} {path}: {e}")))?;

        let response = self.send(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| ServiceError::Protocol(format!("failed to read response body: {e}")))?;

        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| ServiceError::Protocol(format!("invalid JSON from {method} {path}: {e}")))?
        };

        if !status.is_success() {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            return Err(ServiceError::Backend { status: status.as_u16(), message });
        }

        debug!(%method, path, status = status.as_u16(), "backend call ok");
        Ok(value)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    use crate::control;

    #[test]
    fn every_service_has_a_fixed_socket() {
        for service in ServiceType::ALL {
            assert!(socket_for(service).starts_with("/var/lib/"));
        }
    }

    #[tokio::test]
    async fn decodes_json_and_backend_errors() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("backend.socket");
        let app = Router::new()
            .route("/ok", get(|| async { Json(serde_json::json!({"metadata": {"answer": 42}})) }))
            .route(
                "/broken",
                get(|| async { (StatusCode::CONFLICT, Json(serde_json::json!({"error": "already clustered"}))) }),
            );
        tokio::spawn(control::serve_unix(control::bind(&socket).unwrap(), app));

        let client = BackendClient::unix(&socket);

        let value = client.get("/ok").await.unwrap();
        assert_eq!(value["metadata"]["answer"], 42);

        let err = client.get("/broken").await.unwrap_err();
        assert!(matches!(err, ServiceError::Backend { status: 409, ref message } if message == "already clustered"));
    }

    #[tokio::test]
    async fn missing_socket_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let client = BackendClient::unix(dir.path().join("nothing.socket"));

        let err = client.get("/").await.unwrap_err();

        assert!(matches!(err, ServiceError::Unreachable { .. }));
    }
}
