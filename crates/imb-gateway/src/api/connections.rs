//! Live connection listings, per role.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use imb_common::{GatewayError, GatewayResult};
use imb_protocol::Role;

use crate::ws::registry::ConnectionInfo;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/connections", get(list_connections))
        .route("/connections/{role}", get(list_role))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ConnectionsResponse {
    openclaw: Vec<ConnectionInfo>,
    app: Vec<ConnectionInfo>,
}

async fn list_connections(State(state): State<Arc<AppState>>) -> Json<ConnectionsResponse> {
    Json(ConnectionsResponse {
        openclaw: state.registry.all_by_role(Role::Agent),
        app: state.registry.all_by_role(Role::Consumer),
    })
}

async fn list_role(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> GatewayResult<Json<Vec<ConnectionInfo>>> {
    let role: Role = role
        .parse()
        .map_err(|e: imb_protocol::ProtocolError| GatewayError::BadRequest(e.to_string()))?;
    Ok(Json(state.registry.all_by_role(role)))
}
