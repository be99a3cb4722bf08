//! Diagnostics sink shared by the registry, router and connection lifecycles.
//!
//! Each component gets an `Arc<Diagnostics>` at construction. Recording an
//! event emits it through `tracing` and keeps it in a bounded in-memory ring
//! served by `/api/diagnostics`.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use imb_protocol::{ClientId, Role};

use crate::ws::routing::DeliveryFailure;

/// Default number of entries retained.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Something observable that happened inside the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    Connected {
        client_id: ClientId,
    },
    Registered {
        client_id: ClientId,
        role: Role,
    },
    /// An identity was registered twice. Never expected with generated ids.
    IdentityReused {
        client_id: ClientId,
        previous: Role,
        role: Role,
    },
    Unregistered {
        client_id: ClientId,
        role: Role,
    },
    HandshakeFrameIgnored {
        client_id: ClientId,
        message_type: String,
    },
    MalformedFrame {
        client_id: ClientId,
        error: String,
    },
    Delivered {
        from: ClientId,
        to: ClientId,
        message_type: String,
    },
    NotDelivered {
        from: ClientId,
        target: Option<ClientId>,
        message_type: String,
        reason: DeliveryFailure,
    },
    Unroutable {
        from: ClientId,
        message_type: String,
    },
    TransportError {
        client_id: ClientId,
        error: String,
    },
    Disconnected {
        client_id: ClientId,
    },
}

impl GatewayEvent {
    pub fn severity(&self) -> Severity {
        match self {
            Self::HandshakeFrameIgnored { .. }
            | Self::Delivered { .. }
            | Self::Unroutable { .. } => Severity::Debug,
            Self::Connected { .. }
            | Self::Registered { .. }
            | Self::Unregistered { .. }
            | Self::Disconnected { .. } => Severity::Info,
            Self::IdentityReused { .. }
            | Self::MalformedFrame { .. }
            | Self::NotDelivered { .. } => Severity::Warn,
            Self::TransportError { .. } => Severity::Error,
        }
    }

    fn emit(&self) {
        match self {
            Self::Connected { client_id } => {
                tracing::info!(%client_id, "Client connected, awaiting role declaration");
            }
            Self::Registered { client_id, role } => {
                tracing::info!(%client_id, %role, "Client registered");
            }
            Self::IdentityReused {
                client_id,
                previous,
                role,
            } => {
                tracing::warn!(%client_id, %previous, %role, "Identity registered twice, overwriting");
            }
            Self::Unregistered { client_id, role } => {
                tracing::info!(%client_id, %role, "Client unregistered");
            }
            Self::HandshakeFrameIgnored {
                client_id,
                message_type,
            } => {
                tracing::debug!(%client_id, %message_type, "Frame ignored before role declaration");
            }
            Self::MalformedFrame { client_id, error } => {
                tracing::warn!(%client_id, %error, "Failed to parse frame");
            }
            Self::Delivered {
                from,
                to,
                message_type,
            } => {
                tracing::debug!(%from, %to, %message_type, "Message delivered");
            }
            Self::NotDelivered {
                from,
                target,
                message_type,
                reason,
            } => {
                tracing::warn!(%from, ?target, %message_type, %reason, "Message not delivered");
            }
            Self::Unroutable { from, message_type } => {
                tracing::debug!(%from, %message_type, "Unroutable message discarded");
            }
            Self::TransportError { client_id, error } => {
                tracing::error!(%client_id, %error, "WebSocket transport error");
            }
            Self::Disconnected { client_id } => {
                tracing::info!(%client_id, "Client disconnected");
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(flatten)]
    pub event: GatewayEvent,
}

/// Bounded, thread-safe event log.
#[derive(Debug)]
pub struct Diagnostics {
    capacity: usize,
    entries: Mutex<VecDeque<DiagnosticEntry>>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
        }
    }

    pub fn record(&self, event: GatewayEvent) {
        event.emit();
        if self.capacity == 0 {
            return;
        }
        let entry = DiagnosticEntry {
            timestamp: Utc::now(),
            severity: event.severity(),
            event,
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The `count` most recent entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<DiagnosticEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    /// All retained events, oldest first.
    pub fn events(&self) -> Vec<GatewayEvent> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|e| e.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnected(id: &str) -> GatewayEvent {
        GatewayEvent::Disconnected {
            client_id: ClientId::from(id),
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let diagnostics = Diagnostics::new(3);
        for id in ["a", "b", "c", "d"] {
            diagnostics.record(disconnected(id));
        }
        assert_eq!(diagnostics.len(), 3);
        assert_eq!(
            diagnostics.events(),
            vec![disconnected("b"), disconnected("c"), disconnected("d")]
        );
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let diagnostics = Diagnostics::default();
        for id in ["a", "b", "c"] {
            diagnostics.record(disconnected(id));
        }
        let recent: Vec<GatewayEvent> =
            diagnostics.recent(2).into_iter().map(|e| e.event).collect();
        assert_eq!(recent, vec![disconnected("b"), disconnected("c")]);
        assert_eq!(diagnostics.recent(10).len(), 3);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let diagnostics = Diagnostics::new(0);
        diagnostics.record(disconnected("a"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_entry_serializes_flat() {
        let diagnostics = Diagnostics::default();
        diagnostics.record(GatewayEvent::Registered {
            client_id: ClientId::from("client_1_a"),
            role: Role::Agent,
        });
        let value = serde_json::to_value(&diagnostics.recent(1)[0]).unwrap();
        assert_eq!(value["event"], "registered");
        assert_eq!(value["severity"], "info");
        assert_eq!(value["client_id"], "client_1_a");
        assert_eq!(value["role"], "openclaw");
    }
}
