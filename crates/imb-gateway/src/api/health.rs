//! Health check endpoint.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use imb_protocol::Role;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "imb-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.server.environment,
        "connections": {
            "openclaw": state.registry.count_by_role(Role::Agent),
            "app": state.registry.count_by_role(Role::Consumer),
        },
    }))
}
