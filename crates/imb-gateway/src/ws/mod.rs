//! WebSocket relay between agents and consumers.

mod handler;
pub mod lifecycle;
pub mod registry;
pub mod routing;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Clients connect to the listener root; `/ws` is accepted as well.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", axum::routing::get(handler::ws_handler))
        .route("/ws", axum::routing::get(handler::ws_handler))
        .with_state(state)
}
