//! # IM-bot Gateway
//!
//! WebSocket relay between automation agents (`openclaw`) and the consumer
//! apps (`app`) that send them commands. Each socket gets a gateway-assigned
//! identity; commands and results are forwarded point-to-point by identity.

pub mod api;
pub mod diagnostics;
pub mod workers;
pub mod ws;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use imb_common::{AppConfig, GatewayResult};

use crate::diagnostics::Diagnostics;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::routing::MessageRouter;

/// Shared application state available to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub diagnostics: Arc<Diagnostics>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<MessageRouter>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Arc<Self> {
        let diagnostics = Arc::new(Diagnostics::new(config.server.diagnostics_capacity));
        let registry = Arc::new(ConnectionRegistry::new(diagnostics.clone()));
        let router = Arc::new(MessageRouter::new(registry.clone(), diagnostics.clone()));
        Arc::new(Self {
            config,
            diagnostics,
            registry,
            router,
        })
    }
}

/// Build the full HTTP + WebSocket router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(ws::router(state.clone()))
        .merge(api::router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> GatewayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let workers = workers::start_all_workers(state.clone());

    let result = axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    for worker in workers {
        worker.abort();
    }
    Ok(result?)
}
