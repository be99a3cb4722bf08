//! Per-connection protocol state machine.
//!
//! ```text
//! Connecting ──open()──▶ AwaitingRoleDeclaration ──connect{clientType}──▶ Active(role)
//!      │                          │                                          │
//!      └──────────────────────────┴──────────────close()────────────────────┴──▶ Closed
//! ```
//!
//! The machine only sees text frames and an outbound channel, so it can be
//! driven in tests without a socket.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;

use imb_protocol::{timestamp_millis, ClientId, Connect, Envelope, GatewayMessage, Role};

use super::registry::{ConnectionRegistry, WsSender};
use super::routing::{MessageRouter, RouteOutcome};
use crate::diagnostics::{Diagnostics, GatewayEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingRoleDeclaration,
    Active(Role),
    Closed,
}

/// What happened to a single inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Role declared; the connection is now routable.
    Registered(Role),
    /// Dropped without effect.
    Ignored,
    /// Not parseable; dropped, connection kept.
    Malformed,
    /// Heartbeat answered on the same connection.
    Pong,
    /// Client's reply to a server heartbeat. Not recorded.
    HeartbeatAck,
    Routed(RouteOutcome),
}

pub struct ConnectionLifecycle {
    client_id: ClientId,
    state: ConnectionState,
    tx: WsSender,
    registry: Arc<ConnectionRegistry>,
    router: Arc<MessageRouter>,
    diagnostics: Arc<Diagnostics>,
}

impl ConnectionLifecycle {
    /// Create the machine for a freshly accepted socket and assign its identity.
    pub fn new(
        tx: WsSender,
        registry: Arc<ConnectionRegistry>,
        router: Arc<MessageRouter>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            client_id: ClientId::generate(),
            state: ConnectionState::Connecting,
            tx,
            registry,
            router,
            diagnostics,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        match self.state {
            ConnectionState::Active(role) => Some(role),
            _ => None,
        }
    }

    /// Send the handshake acknowledgment carrying the assigned identity.
    pub fn open(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        self.diagnostics.record(GatewayEvent::Connected {
            client_id: self.client_id.clone(),
        });
        self.send(&GatewayMessage::connect_ack(
            self.client_id.clone(),
            timestamp_millis(),
        ));
        self.state = ConnectionState::AwaitingRoleDeclaration;
    }

    /// Process one inbound text frame.
    pub fn handle_text(&mut self, text: &str) -> FrameOutcome {
        if !self.accepts_frames() {
            return FrameOutcome::Ignored;
        }

        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => return self.malformed(e.to_string()),
        };

        match self.state {
            ConnectionState::AwaitingRoleDeclaration => self.declare_role(&envelope),
            ConnectionState::Active(_) => self.dispatch(&envelope),
            ConnectionState::Connecting | ConnectionState::Closed => FrameOutcome::Ignored,
        }
    }

    /// Binary frames carry the same JSON protocol and must be valid UTF-8.
    pub fn handle_binary(&mut self, data: &[u8]) -> FrameOutcome {
        match std::str::from_utf8(data) {
            Ok(text) => self.handle_text(text),
            Err(_) if !self.accepts_frames() => FrameOutcome::Ignored,
            Err(e) => self.malformed(e.to_string()),
        }
    }

    /// Record a transport fault. The transport's own close follows; this
    /// does not change state.
    pub fn transport_error(&self, error: &dyn fmt::Display) {
        self.diagnostics.record(GatewayEvent::TransportError {
            client_id: self.client_id.clone(),
            error: error.to_string(),
        });
    }

    /// Enter `Closed`, removing the identity from the registry. Runs once.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.registry.unregister(&self.client_id);
        self.diagnostics.record(GatewayEvent::Disconnected {
            client_id: self.client_id.clone(),
        });
    }

    fn accepts_frames(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::AwaitingRoleDeclaration | ConnectionState::Active(_)
        )
    }

    fn malformed(&self, error: String) -> FrameOutcome {
        self.diagnostics.record(GatewayEvent::MalformedFrame {
            client_id: self.client_id.clone(),
            error,
        });
        FrameOutcome::Malformed
    }

    fn declare_role(&mut self, envelope: &Envelope) -> FrameOutcome {
        match &envelope.message {
            GatewayMessage::Connect(Connect {
                client_type: Some(role),
                ..
            }) => {
                let role = *role;
                self.registry
                    .register(self.client_id.clone(), role, self.tx.clone());
                self.state = ConnectionState::Active(role);
                FrameOutcome::Registered(role)
            }
            _ => {
                self.diagnostics.record(GatewayEvent::HandshakeFrameIgnored {
                    client_id: self.client_id.clone(),
                    message_type: envelope.kind().to_string(),
                });
                FrameOutcome::Ignored
            }
        }
    }

    fn dispatch(&mut self, envelope: &Envelope) -> FrameOutcome {
        match &envelope.message {
            GatewayMessage::Ping(_) => {
                self.send(&GatewayMessage::pong(timestamp_millis()));
                FrameOutcome::Pong
            }
            // Role is fixed for the lifetime of the connection.
            GatewayMessage::Connect(_) => {
                tracing::debug!(client_id = %self.client_id, "Repeated connect ignored");
                FrameOutcome::Ignored
            }
            GatewayMessage::Pong(_) => {
                tracing::trace!(client_id = %self.client_id, "Heartbeat acknowledged");
                FrameOutcome::HeartbeatAck
            }
            GatewayMessage::Cmd(_)
            | GatewayMessage::Result(_)
            | GatewayMessage::Disconnect(_)
            | GatewayMessage::Unknown => {
                FrameOutcome::Routed(self.router.route(envelope, &self.client_id))
            }
        }
    }

    fn send(&self, message: &GatewayMessage) {
        match message.to_json() {
            Ok(text) => {
                if self.tx.send(Message::Text(text.into())).is_err() {
                    tracing::debug!(client_id = %self.client_id, "Writer gone, frame dropped");
                }
            }
            Err(e) => {
                tracing::error!(client_id = %self.client_id, error = %e, "Failed to serialize frame");
            }
        }
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use crate::ws::routing::DeliveryFailure;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        router: Arc<MessageRouter>,
        diagnostics: Arc<Diagnostics>,
    }

    impl Harness {
        fn new() -> Self {
            let diagnostics = Arc::new(Diagnostics::default());
            let registry = Arc::new(ConnectionRegistry::new(diagnostics.clone()));
            let router = Arc::new(MessageRouter::new(registry.clone(), diagnostics.clone()));
            Self {
                registry,
                router,
                diagnostics,
            }
        }

        fn accept(&self) -> (ConnectionLifecycle, mpsc::UnboundedReceiver<Message>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut conn = ConnectionLifecycle::new(
                tx,
                self.registry.clone(),
                self.router.clone(),
                self.diagnostics.clone(),
            );
            conn.open();
            (conn, rx)
        }

        fn accept_as(&self, role: Role) -> (ConnectionLifecycle, mpsc::UnboundedReceiver<Message>) {
            let (mut conn, mut rx) = self.accept();
            let _ack = next_json(&mut rx);
            let declaration = json!({"type": "connect", "clientType": role.as_str()});
            assert_eq!(
                conn.handle_text(&declaration.to_string()),
                FrameOutcome::Registered(role)
            );
            (conn, rx)
        }
    }

    fn next_text(rx: &mut mpsc::UnboundedReceiver<Message>) -> String {
        match rx.try_recv().expect("a frame was queued") {
            Message::Text(t) => t.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn next_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        serde_json::from_str(&next_text(rx)).unwrap()
    }

    #[test]
    fn test_open_sends_handshake_ack() {
        let h = Harness::new();
        let (conn, mut rx) = h.accept();
        assert_eq!(conn.state(), ConnectionState::AwaitingRoleDeclaration);

        let ack = next_json(&mut rx);
        assert_eq!(ack["type"], "connect");
        assert_eq!(ack["clientId"], conn.client_id().as_str());
        assert!(ack["timestamp"].is_i64());
        assert!(rx.try_recv().is_err());
        assert_eq!(h.registry.count_by_role(Role::Agent), 0);
    }

    #[test]
    fn test_frames_before_role_declaration_are_ignored() {
        let h = Harness::new();
        let _agent = h.accept_as(Role::Agent);
        let (mut conn, mut rx) = h.accept();
        let _ack = next_text(&mut rx);

        let agent_id = h.registry.all_by_role(Role::Agent)[0].client_id.clone();
        let cmd = json!({"type": "cmd", "id": "x", "targetClientId": agent_id});
        assert_eq!(conn.handle_text(&cmd.to_string()), FrameOutcome::Ignored);
        assert_eq!(
            conn.handle_text(r#"{"type":"ping","timestamp":1}"#),
            FrameOutcome::Ignored
        );
        // A connect without a known role does not complete the handshake.
        assert_eq!(
            conn.handle_text(r#"{"type":"connect"}"#),
            FrameOutcome::Ignored
        );
        assert_eq!(
            conn.handle_text(r#"{"type":"connect","clientType":"admin"}"#),
            FrameOutcome::Ignored
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.state(), ConnectionState::AwaitingRoleDeclaration);
        assert_eq!(h.registry.count_by_role(Role::Consumer), 0);
    }

    #[test]
    fn test_role_declaration_registers() {
        let h = Harness::new();
        let (conn, _rx) = h.accept_as(Role::Consumer);
        assert_eq!(conn.state(), ConnectionState::Active(Role::Consumer));
        assert_eq!(conn.role(), Some(Role::Consumer));
        assert!(h
            .registry
            .lookup(conn.client_id().as_str(), Role::Consumer)
            .is_some());
        assert!(h
            .registry
            .lookup(conn.client_id().as_str(), Role::Agent)
            .is_none());
    }

    #[test]
    fn test_role_is_immutable() {
        let h = Harness::new();
        let (mut conn, _rx) = h.accept_as(Role::Agent);
        assert_eq!(
            conn.handle_text(r#"{"type":"connect","clientType":"app"}"#),
            FrameOutcome::Ignored
        );
        assert_eq!(conn.role(), Some(Role::Agent));
        assert_eq!(h.registry.count_by_role(Role::Consumer), 0);
    }

    #[test]
    fn test_heartbeat_replies_are_not_recorded() {
        let h = Harness::new();
        let (mut conn, mut rx) = h.accept_as(Role::Agent);
        h.diagnostics.clear();

        for _ in 0..50 {
            assert_eq!(
                conn.handle_text(r#"{"type":"pong","timestamp":1729339200000}"#),
                FrameOutcome::HeartbeatAck
            );
        }
        assert!(rx.try_recv().is_err());
        assert!(h.diagnostics.is_empty());
        assert_eq!(conn.state(), ConnectionState::Active(Role::Agent));
    }

    #[test]
    fn test_malformed_frame_keeps_connection() {
        let h = Harness::new();
        let (mut conn, mut rx) = h.accept_as(Role::Agent);
        assert_eq!(conn.handle_text("{not json"), FrameOutcome::Malformed);
        assert_eq!(conn.state(), ConnectionState::Active(Role::Agent));
        assert!(rx.try_recv().is_err());
        assert!(h
            .diagnostics
            .events()
            .iter()
            .any(|e| matches!(e, GatewayEvent::MalformedFrame { .. })));
    }

    #[test]
    fn test_binary_frames() {
        let h = Harness::new();
        let (mut conn, mut rx) = h.accept_as(Role::Agent);
        assert_eq!(
            conn.handle_binary(br#"{"type":"ping"}"#),
            FrameOutcome::Pong
        );
        assert_eq!(next_json(&mut rx)["type"], "pong");
        assert_eq!(conn.handle_binary(&[0xff, 0xfe]), FrameOutcome::Malformed);
    }

    #[test]
    fn test_ping_yields_exactly_one_pong() {
        let h = Harness::new();
        let (mut conn, mut rx) = h.accept_as(Role::Consumer);
        let before = (
            h.registry.count_by_role(Role::Agent),
            h.registry.count_by_role(Role::Consumer),
        );

        assert_eq!(
            conn.handle_text(r#"{"type":"ping","timestamp":123}"#),
            FrameOutcome::Pong
        );
        let pong = next_json(&mut rx);
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_i64());
        assert!(rx.try_recv().is_err());

        let after = (
            h.registry.count_by_role(Role::Agent),
            h.registry.count_by_role(Role::Consumer),
        );
        assert_eq!(before, after);
    }

    #[test]
    fn test_cmd_and_result_round_trip() {
        let h = Harness::new();
        let (mut agent, mut agent_rx) = h.accept_as(Role::Agent);
        let (mut consumer, mut consumer_rx) = h.accept_as(Role::Consumer);

        let cmd = json!({
            "type": "cmd",
            "id": "x",
            "targetClientId": agent.client_id(),
            "content": "run",
            "timestamp": 1
        });
        let outcome = consumer.handle_text(&cmd.to_string());
        assert_eq!(
            outcome,
            FrameOutcome::Routed(RouteOutcome::Delivered {
                to: agent.client_id().clone()
            })
        );
        assert_eq!(next_json(&mut agent_rx), cmd);

        let result = json!({
            "type": "result",
            "cmdId": "x",
            "status": "success",
            "content": "42",
            "targetClientId": consumer.client_id(),
            "timestamp": 2
        });
        assert!(matches!(
            agent.handle_text(&result.to_string()),
            FrameOutcome::Routed(RouteOutcome::Delivered { .. })
        ));
        assert_eq!(next_json(&mut consumer_rx), result);
    }

    #[test]
    fn test_cmd_to_missing_agent_reports_non_delivery() {
        let h = Harness::new();
        let (mut consumer, mut rx) = h.accept_as(Role::Consumer);
        let outcome = consumer.handle_text(r#"{"type":"cmd","id":"x","targetClientId":"nobody"}"#);
        assert_eq!(
            outcome,
            FrameOutcome::Routed(RouteOutcome::NotDelivered {
                reason: DeliveryFailure::TargetNotConnected
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_unregisters_once() {
        let h = Harness::new();
        let (mut conn, _rx) = h.accept_as(Role::Agent);
        assert_eq!(h.registry.count_by_role(Role::Agent), 1);

        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(h.registry.count_by_role(Role::Agent), 0);

        let unregistered = h
            .diagnostics
            .events()
            .into_iter()
            .filter(|e| matches!(e, GatewayEvent::Unregistered { .. }))
            .count();
        assert_eq!(unregistered, 1);
    }

    #[test]
    fn test_frames_after_close_are_ignored() {
        let h = Harness::new();
        let (mut conn, mut rx) = h.accept_as(Role::Consumer);
        conn.close();
        assert_eq!(
            conn.handle_text(r#"{"type":"ping"}"#),
            FrameOutcome::Ignored
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_transport_error_does_not_close() {
        let h = Harness::new();
        let (conn, _rx) = h.accept_as(Role::Agent);
        conn.transport_error(&"connection reset");
        assert_eq!(conn.state(), ConnectionState::Active(Role::Agent));
        assert_eq!(h.registry.count_by_role(Role::Agent), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let h = Harness::new();
        let (conn, _rx) = h.accept_as(Role::Consumer);
        assert_eq!(h.registry.count_by_role(Role::Consumer), 1);
        drop(conn);
        assert_eq!(h.registry.count_by_role(Role::Consumer), 0);
    }

    #[test]
    fn test_each_connection_gets_a_fresh_identity() {
        let h = Harness::new();
        let (a, _) = h.accept();
        let (b, _) = h.accept();
        assert_ne!(a.client_id(), b.client_id());
    }
}
