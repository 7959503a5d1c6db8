//! HTTP over a unix socket.
//!
//! `axum::serve` only accepts TCP listeners, so the control socket gets its
//! own accept loop driving hyper directly. Connections keep upgrade support
//! so proxied streams work the same locally as over the network.

use std::io;
use std::path::Path;

use axum::body::Body;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tower::ServiceExt;
use tracing::debug;

/// Bind `path`, replacing a stale socket file left by a previous run.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}

/// Serve `app` on every connection accepted from `listener`. One task per
/// connection; only an accept failure ends the loop.
pub async fn serve_unix(listener: UnixListener, app: Router) -> io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let app = app.clone();

        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| app.clone().oneshot(request.map(Body::new)));

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await
            {
                debug!(error = %e, "control connection ended with error");
            }
        });
    }
}
