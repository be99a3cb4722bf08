//! Socket plumbing: splits each upgraded socket into a writer task fed by an
//! mpsc channel and a read loop that drives the connection's lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::lifecycle::ConnectionLifecycle;
use crate::AppState;

/// How long a closing socket may spend flushing frames already queued for it.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::debug!(%peer, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: Arc<AppState>) {
    let (ws_sender, mut ws_receiver) = socket.split();

    // Every writer (own replies, routed frames, heartbeats) goes through this channel
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Forward channel → WebSocket
    let send_task = tokio::spawn(write_frames(ws_sender, rx));

    let mut conn = ConnectionLifecycle::new(
        tx,
        state.registry.clone(),
        state.router.clone(),
        state.diagnostics.clone(),
    );
    conn.open();
    tracing::info!(%peer, client_id = %conn.client_id(), "WebSocket connected");

    // Receive loop
    while let Some(msg) = ws_receiver.next().await {
        let outcome = match msg {
            Ok(Message::Text(text)) => conn.handle_text(text.as_str()),
            Ok(Message::Binary(data)) => conn.handle_binary(&data),
            Ok(Message::Close(_)) => {
                tracing::debug!(client_id = %conn.client_id(), "Close frame received");
                break;
            }
            // tungstenite answers protocol-level pings itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                conn.transport_error(&e);
                // The stream is unusable after a read error; the socket closes next.
                break;
            }
        };
        tracing::trace!(client_id = %conn.client_id(), ?outcome, "Frame handled");
    }

    // ── Cleanup ──────────────────────────────────────────────
    // Dropping the lifecycle unregisters it and releases its sender, so the
    // writer stops once the queue is empty.
    let client_id = conn.client_id().clone();
    drop(conn);
    if drain_writer(send_task, WRITER_DRAIN_TIMEOUT).await.is_none() {
        tracing::debug!(%client_id, "Writer did not drain in time, aborted");
    }
}

/// Write queued frames to the socket until every sender is gone or the
/// socket refuses a write.
async fn write_frames<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Message>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
}

/// Wait for the writer to finish, aborting it after `limit`.
async fn drain_writer(mut send_task: JoinHandle<()>, limit: Duration) -> Option<()> {
    match tokio::time::timeout(limit, &mut send_task).await {
        Ok(joined) => joined.ok(),
        Err(_) => {
            send_task.abort();
            None
        }
    }
}
