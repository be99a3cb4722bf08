//! Heartbeat worker: pings every registered client on a fixed interval.
//!
//! Frames go out through `ConnectionRegistry::broadcast`, so sockets that
//! are no longer open are skipped and left for their close path to remove.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use imb_protocol::{timestamp_millis, GatewayMessage, Role};

use crate::ws::registry::ConnectionRegistry;
use crate::AppState;

/// Spawn the heartbeat loop, or return `None` when the interval is 0.
pub fn start(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let interval_secs = state.config.server.heartbeat_interval_secs;
    if interval_secs == 0 {
        tracing::info!("Heartbeat disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick completes immediately.
        interval.tick().await;

        tracing::info!("Heartbeat started (every {}s)", interval_secs);

        loop {
            interval.tick().await;
            let sent = beat(&state.registry);
            tracing::debug!(sent, "Heartbeat ping broadcast");
        }
    }))
}

/// Send one ping to every open connection of both roles.
pub fn beat(registry: &ConnectionRegistry) -> usize {
    let ping = GatewayMessage::ping(timestamp_millis());
    Role::ALL
        .iter()
        .map(|role| registry.broadcast(*role, &ping))
        .sum()
}
