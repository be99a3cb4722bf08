//! HTTP diagnostics surface: health and live connection introspection.

mod connections;
mod diagnostics;
mod health;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().merge(health::router(state.clone())).nest(
        "/api",
        Router::new()
            .merge(connections::router(state.clone()))
            .merge(diagnostics::router(state)),
    )
}
