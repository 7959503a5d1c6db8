//! REST surface of a cirrus node.
//!
//! | Method                       | Path                              | Action                         |
//! |------------------------------|-----------------------------------|--------------------------------|
//! | `PUT`                        | `/1.0/services`                   | join the requested services    |
//! | `GET PUT POST PATCH DELETE`  | `/1.0/services/{backend}/{rest}`  | proxy to the backend's socket  |
//!
//! Every route sits behind [`require_secret`].

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put, MethodRouter};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use cirrus_cluster::{
    join_services, AuthSecret, ClusterError, DiskRequest, JoinConfig, MemberConfigKey, ServiceHandler, ServiceType,
};

use crate::auth::{require_secret, AuthGate};
use crate::config::Config;
use crate::proxy::{ProxyError, ProxyRouter};
use crate::services::ServiceFactory;

// ── State ─────────────────────────────────────────────────────────────────────

pub struct AppState {
    pub node_name: String,
    /// Default address sent to backends when a join names none.
    pub address: String,
    pub secret: Option<AuthSecret>,
    pub gate: Arc<AuthGate>,
    pub factory: Arc<dyn ServiceFactory>,
    pub proxy: ProxyRouter,
}

impl AppState {
    pub fn new(config: &Config, factory: Arc<dyn ServiceFactory>, proxy: ProxyRouter) -> Self {
        Self {
            node_name: config.node_name.clone(),
            address: config.advertise_addr.clone(),
            secret: config.auth_secret.clone(),
            gate: Arc::new(AuthGate::new(config.auth_secret.clone())),
            factory,
            proxy,
        }
    }
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/1.0/services", put(services_put))
        .route("/1.0/services/:backend", proxied())
        .route("/1.0/services/:backend/*rest", proxied())
        .layer(middleware::from_fn_with_state(state.gate.clone(), require_secret))
        .with_state(state)
}

fn proxied() -> MethodRouter<SharedState> {
    get(proxy).put(proxy).post(proxy).patch(proxy).delete(proxy)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// JSON error body shared by every failing route.
pub fn error_response(status: StatusCode, message: impl Display) -> Response {
    let body = json!({
        "type": "error",
        "error_code": status.as_u16(),
        "error": message.to_string(),
    });
    (status, Json(body)).into_response()
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Join(#[from] ClusterError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self)
    }
}

// ── PUT /1.0/services ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceToken {
    pub service: ServiceType,
    pub join_token: String,
}

/// Join request sent by the initiating node to every new member.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesPut {
    pub tokens: Vec<ServiceToken>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub hypervisor_config: Vec<MemberConfigKey>,
    #[serde(default)]
    pub storage_config: Vec<DiskRequest>,
}

async fn services_put(State(state): State<SharedState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let req: ServicesPut = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let address = req
        .address
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| state.address.clone());

    let mut handler = ServiceHandler::new(&state.node_name, &address, state.secret.clone());
    let mut configs = BTreeMap::new();
    for token in &req.tokens {
        handler.register(state.factory.service(token.service, &state.node_name, &address));
        configs.insert(
            token.service,
            JoinConfig {
                token: token.join_token.clone(),
                hypervisor_config: req.hypervisor_config.clone(),
                storage_config: req.storage_config.clone(),
            },
        );
    }

    info!(node = %state.node_name, %address, services = ?handler.service_types(), "joining services");
    join_services(&handler, &configs).await.map_err(|e| {
        warn!(error = %e, "join failed");
        e
    })?;

    Ok(Json(json!({ "type": "sync", "status": "Success", "status_code": 200 })))
}

// ── Proxy ─────────────────────────────────────────────────────────────────────

async fn proxy(State(state): State<SharedState>, request: Request) -> Result<Response, ProxyError> {
    state.proxy.forward(request).await
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
