//! In-memory registry for live WebSocket connections.
//!
//! Connections are partitioned by role: agents and consumers live in
//! separate maps, and a third map remembers each identity's role so
//! unregistration never depends on the caller knowing it.

use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use imb_protocol::{ClientId, GatewayMessage, Role};

use crate::diagnostics::{Diagnostics, GatewayEvent};

/// Channel sender capable of pushing WS frames to a connected peer.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// A registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub client_id: ClientId,
    pub role: Role,
    pub tx: WsSender,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Whether the socket's writer task is still draining frames.
    ///
    /// Registry presence alone does not imply this: the close path may not
    /// have run yet.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame. Returns `false` if the writer has gone away.
    pub fn send_text(&self, text: &str) -> bool {
        self.tx.send(Message::Text(text.into())).is_ok()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            client_id: self.client_id.clone(),
            role: self.role,
            connected_at: self.connected_at,
            open: self.is_open(),
        }
    }
}

/// Serializable view of a connection for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub client_id: ClientId,
    pub role: Role,
    pub connected_at: DateTime<Utc>,
    pub open: bool,
}

/// Central registry shared across all WebSocket handler tasks.
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// agent id → connection
    agents: DashMap<ClientId, ConnectionRecord>,
    /// consumer id → connection
    consumers: DashMap<ClientId, ConnectionRecord>,
    /// id → role, for role-agnostic unregistration
    roles: DashMap<ClientId, Role>,
    diagnostics: Arc<Diagnostics>,
}

impl ConnectionRegistry {
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            agents: DashMap::new(),
            consumers: DashMap::new(),
            roles: DashMap::new(),
            diagnostics,
        }
    }

    fn connections(&self, role: Role) -> &DashMap<ClientId, ConnectionRecord> {
        match role {
            Role::Agent => &self.agents,
            Role::Consumer => &self.consumers,
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────

    /// Register a connection under `role`.
    ///
    /// An identity that is already present is overwritten. If it was held
    /// under the other role it is evicted from that map first, so an identity
    /// is never visible to both populations.
    pub fn register(&self, client_id: ClientId, role: Role, tx: WsSender) {
        let record = ConnectionRecord {
            client_id: client_id.clone(),
            role,
            tx,
            connected_at: Utc::now(),
        };

        // The roles entry guard serializes register/unregister per identity.
        let previous = match self.roles.entry(client_id.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = *entry.get();
                if previous != role {
                    self.connections(previous).remove(&client_id);
                }
                self.connections(role).insert(client_id.clone(), record);
                entry.insert(role);
                Some(previous)
            }
            Entry::Vacant(entry) => {
                self.connections(role).insert(client_id.clone(), record);
                entry.insert(role);
                None
            }
        };

        if let Some(previous) = previous {
            self.diagnostics.record(GatewayEvent::IdentityReused {
                client_id: client_id.clone(),
                previous,
                role,
            });
        }
        self.diagnostics
            .record(GatewayEvent::Registered { client_id, role });
    }

    /// Remove a connection using its stored role.
    ///
    /// Idempotent: unknown identities are a no-op. Returns the role the
    /// identity was registered under, if any.
    pub fn unregister(&self, client_id: &ClientId) -> Option<Role> {
        let removed = match self.roles.entry(client_id.clone()) {
            Entry::Occupied(entry) => {
                let role = *entry.get();
                self.connections(role).remove(client_id);
                entry.remove();
                Some(role)
            }
            Entry::Vacant(_) => None,
        };

        if let Some(role) = removed {
            self.diagnostics.record(GatewayEvent::Unregistered {
                client_id: client_id.clone(),
                role,
            });
        }
        removed
    }

    // ─── Lookup ──────────────────────────────────────────────

    /// Find a connection in the given role's population.
    ///
    /// Callers must still check [`ConnectionRecord::is_open`] before use.
    pub fn lookup(&self, client_id: &str, role: Role) -> Option<ConnectionRecord> {
        self.connections(role)
            .get(client_id)
            .map(|entry| entry.value().clone())
    }

    pub fn role_of(&self, client_id: &str) -> Option<Role> {
        self.roles.get(client_id).map(|entry| *entry.value())
    }

    // ─── Fan-out ─────────────────────────────────────────────

    /// Send `message` to every open connection of `role`.
    ///
    /// Connections whose socket is no longer open are skipped but left in
    /// place; removal belongs to the close path. Returns the number of
    /// connections the frame was queued for.
    pub fn broadcast(&self, role: Role, message: &GatewayMessage) -> usize {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(%role, error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let mut sent = 0;
        for entry in self.connections(role).iter() {
            let record = entry.value();
            if record.is_open() && record.send_text(&text) {
                sent += 1;
            }
        }
        tracing::debug!(%role, message_type = message.type_name(), sent, "Broadcast");
        sent
    }

    // ─── Stats ───────────────────────────────────────────────

    pub fn count_by_role(&self, role: Role) -> usize {
        self.connections(role).len()
    }

    /// All connections of `role`, oldest first.
    pub fn all_by_role(&self, role: Role) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> = self
            .connections(role)
            .iter()
            .map(|entry| entry.value().info())
            .collect();
        all.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        all
    }
}
