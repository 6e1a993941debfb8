//! HTTP status and control surface
//!
//! A poll-friendly snapshot read plus three control operations, each
//! acknowledged immediately; callers observe outcomes through the status
//! snapshot, never through the control response.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use porthop_core::{StatusRecord, TunnelConfig, TunnelName};

use crate::registry::TunnelRegistry;

/// Build the API router
pub fn router(registry: Arc<TunnelRegistry>) -> Router {
    Router::new()
        .route("/v1/tunnels", get(list_tunnels).post(connect_tunnel))
        .route("/v1/tunnels/:name", get(get_tunnel))
        .route("/v1/tunnels/:name/disconnect", post(disconnect_tunnel))
        .route("/v1/tunnels/:name/cancel", post(cancel_tunnel))
        .with_state(registry)
}

/// Full name → status map for pollers
async fn list_tunnels(
    State(registry): State<Arc<TunnelRegistry>>,
) -> Json<BTreeMap<TunnelName, StatusRecord>> {
    Json(registry.status_all())
}

/// Latest status for one tunnel; unknown names read as disconnected
async fn get_tunnel(
    State(registry): State<Arc<TunnelRegistry>>,
    Path(name): Path<String>,
) -> Json<StatusRecord> {
    Json(registry.status(&TunnelName::new(name)))
}

/// Schedule a connect; 400 for invalid configs, otherwise 202 with the
/// current status record
async fn connect_tunnel(
    State(registry): State<Arc<TunnelRegistry>>,
    Json(config): Json<TunnelConfig>,
) -> Response {
    match registry.connect(config) {
        Ok(record) => (StatusCode::ACCEPTED, Json(record)).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Schedule a graceful teardown; always acknowledged
async fn disconnect_tunnel(
    State(registry): State<Arc<TunnelRegistry>>,
    Path(name): Path<String>,
) -> StatusCode {
    registry.disconnect(&TunnelName::new(name));
    StatusCode::ACCEPTED
}

/// Schedule a forceful abort; always acknowledged
async fn cancel_tunnel(
    State(registry): State<Arc<TunnelRegistry>>,
    Path(name): Path<String>,
) -> StatusCode {
    registry.cancel(&TunnelName::new(name));
    StatusCode::ACCEPTED
}
