//! Reverse proxy from `/1.0/services/{backend}/...` to backend control sockets.
//!
//! Every request gets a fresh outbound request on a fresh connection; the
//! router keeps no state between requests. Upgrade requests that the backend
//! accepts with `101 Switching Protocols` become a raw byte tunnel between the
//! two upgraded connections.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::header::{HOST, UPGRADE};
use axum::http::{Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use cirrus_cluster::{ServiceError, ServiceType};

use crate::api::error_response;
use crate::backend;

/// Path prefix under which backends are exposed.
pub const API_PREFIX: &str = "/1.0/services";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid proxy path {0:?}")]
    BadPath(String),

    #[error("unknown backend {0:?}")]
    UnknownBackend(String),

    #[error(transparent)]
    Upstream(#[from] ServiceError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ProxyError::BadPath(_)        => StatusCode::BAD_REQUEST,
            ProxyError::UnknownBackend(_) => StatusCode::NOT_FOUND,
            ProxyError::Upstream(_)       => StatusCode::BAD_GATEWAY,
        };
        error_response(status, &self)
    }
}

// ── Path handling ─────────────────────────────────────────────────────────────

/// Split a proxied path into the backend name and the path to send it.
///
/// `/1.0/services/hypervisor/1.0/instances` gives
/// `("hypervisor", "/1.0/instances")`; a bare `/1.0/services/hypervisor` maps
/// to the backend root `/`.
pub fn split_path(path: &str) -> Result<(&str, String), ProxyError> {
    let bad = || ProxyError::BadPath(path.to_string());

    let rest = path
        .strip_prefix(API_PREFIX)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(bad)?;

    let (name, downstream) = match rest.split_once('/') {
        Some((name, tail)) => (name, format!("/{tail}")),
        None => (rest, "/".to_string()),
    };
    if name.is_empty() {
        return Err(bad());
    }
    Ok((name, downstream))
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Backend prefix to control socket table.
#[derive(Debug, Clone, Default)]
pub struct ProxyRouter {
    backends: BTreeMap<String, PathBuf>,
}

impl ProxyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The proxied backends at their fixed socket paths.
    pub fn standard() -> Self {
        [ServiceType::Hypervisor, ServiceType::Storage, ServiceType::Network]
            .into_iter()
            .fold(Self::new(), |router, service| {
                router.with_backend(service.as_str(), backend::socket_for(service))
            })
    }

    pub fn with_backend(mut self, name: impl Into<String>, socket: impl Into<PathBuf>) -> Self {
        self.backends.insert(name.into(), socket.into());
        self
    }

    pub fn socket(&self, name: &str) -> Option<&Path> {
        self.backends.get(name).map(PathBuf::as_path)
    }

    /// Forward one request to the backend named in its path and relay the answer.
    pub async fn forward(&self, mut request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (name, downstream) = split_path(request.uri().path())?;
        let name = name.to_string();
        let socket = self
            .socket(&name)
            .ok_or_else(|| ProxyError::UnknownBackend(name.clone()))?
            .to_path_buf();

        let target = match request.uri().query() {
            Some(query) => format!("{downstream}?{query}"),
            None => downstream,
        };
        let uri: Uri = target
            .parse()
            .map_err(|_| ProxyError::BadPath(request.uri().path().to_string()))?;

        let wants_upgrade = request.headers().contains_key(UPGRADE);
        let client_upgrade = wants_upgrade.then(|| hyper::upgrade::on(&mut request));

        debug!(backend = %name, method = %request.method(), uri = %uri, upgrade = wants_upgrade, "proxying");

        let outbound = outbound_request(request, uri);
        let mut sender = backend::connect_unix(&socket).await?;
        let mut response = sender
            .send_request(outbound)
            .await
            .map_err(|e| ServiceError::Protocol(format!("{name} backend request failed: {e}")))?;

        match client_upgrade {
            Some(client_upgrade) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                let upstream_upgrade = hyper::upgrade::on(&mut response);

                let mut switching = Response::new(Body::empty());
                *switching.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
                *switching.headers_mut() = response.headers().clone();

                tokio::spawn(async move {
                    match tokio::try_join!(client_upgrade, upstream_upgrade) {
                        Ok((client, upstream)) => {
                            if let Err(e) = relay(TokioIo::new(client), TokioIo::new(upstream)).await {
                                debug!(backend = %name, error = %e, "stream relay ended with error");
                            }
                        }
                        Err(e) => warn!(backend = %name, error = %e, "connection upgrade failed"),
                    }
                });

                Ok(switching)
            }
            _ => Ok(response.map(Body::new)),
        }
    }
}

/// Rebuild the client's request for the backend: same method, headers and
/// body, new target, `Host` pointing at the local socket.
fn outbound_request(request: Request<Body>, uri: Uri) -> Request<Body> {
    let (parts, body) = request.into_parts();

    let mut outbound = Request::new(body);
    *outbound.method_mut() = parts.method;
    *outbound.uri_mut() = uri;
    *outbound.version_mut() = Version::HTTP_11;
    *outbound.headers_mut() = parts.headers;
    outbound
        .headers_mut()
        .insert(HOST, axum::http::HeaderValue::from_static("localhost"));
    outbound
}

/// Shuttle bytes both ways until either direction finishes, then shut down
/// both write halves.
pub async fn relay<C, U>(client: C, upstream: U) -> io::Result<()>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let result = tokio::select! {
        copied = tokio::io::copy(&mut client_read, &mut upstream_write) => copied,
        copied = tokio::io::copy(&mut upstream_read, &mut client_write) => copied,
    };

    if let Err(e) = client_write.shutdown().await {
        debug!(error = %e, "client shutdown");
    }
    if let Err(e) = upstream_write.shutdown().await {
        debug!(error = %e, "upstream shutdown");
    }

    result.map(|_| ())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
