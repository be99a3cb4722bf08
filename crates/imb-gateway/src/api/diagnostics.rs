//! Recent diagnostic events.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::diagnostics::DiagnosticEntry;
use crate::AppState;

const DEFAULT_COUNT: usize = 100;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/diagnostics", get(recent))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    count: Option<usize>,
}

async fn recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Json<Vec<DiagnosticEntry>> {
    Json(
        state
            .diagnostics
            .recent(query.count.unwrap_or(DEFAULT_COUNT)),
    )
}
