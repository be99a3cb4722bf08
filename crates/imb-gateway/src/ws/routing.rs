//! Point-to-point message routing between agents and consumers.
//!
//! The router holds no per-connection state. For each routable frame it
//! picks the single recipient from the registry and forwards the sender's
//! original text, or reports why it could not.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use imb_protocol::{ClientId, Envelope, GatewayMessage, Role};

use super::registry::ConnectionRegistry;
use crate::diagnostics::{Diagnostics, GatewayEvent};

/// Why a routable message was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFailure {
    /// The frame did not name a recipient.
    MissingTarget,
    /// The recipient is not registered in the expected role, or its socket
    /// is no longer open.
    TargetNotConnected,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::MissingTarget => f.write_str("missing target client id"),
            DeliveryFailure::TargetNotConnected => f.write_str("target not connected"),
        }
    }
}

/// Synchronous result of a single route attempt. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    Delivered { to: ClientId },
    NotDelivered { reason: DeliveryFailure },
    /// Not a routable message type; discarded.
    Unroutable,
}

impl RouteOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, RouteOutcome::Delivered { .. })
    }

    pub fn reason(&self) -> Option<DeliveryFailure> {
        match self {
            RouteOutcome::NotDelivered { reason } => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    diagnostics: Arc<Diagnostics>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            registry,
            diagnostics,
        }
    }

    /// Route one inbound frame from `sender`.
    ///
    /// Commands go to the agent named by `targetClientId`; results go to the
    /// consumer named in the result. Anything else is unroutable.
    pub fn route(&self, envelope: &Envelope, sender: &ClientId) -> RouteOutcome {
        match &envelope.message {
            GatewayMessage::Cmd(cmd) => {
                self.forward(envelope, sender, cmd.target_client_id.as_ref(), Role::Agent)
            }
            GatewayMessage::Result(result) => {
                self.forward(envelope, sender, result.recipient(), Role::Consumer)
            }
            GatewayMessage::Connect(_)
            | GatewayMessage::Ping(_)
            | GatewayMessage::Pong(_)
            | GatewayMessage::Disconnect(_)
            | GatewayMessage::Unknown => {
                self.diagnostics.record(GatewayEvent::Unroutable {
                    from: sender.clone(),
                    message_type: envelope.kind().to_string(),
                });
                RouteOutcome::Unroutable
            }
        }
    }

    fn forward(
        &self,
        envelope: &Envelope,
        sender: &ClientId,
        target: Option<&ClientId>,
        role: Role,
    ) -> RouteOutcome {
        let Some(target) = target else {
            return self.not_delivered(envelope, sender, None, DeliveryFailure::MissingTarget);
        };

        let delivered = self
            .registry
            .lookup(target.as_str(), role)
            .filter(|peer| peer.is_open())
            .is_some_and(|peer| peer.send_text(envelope.raw()));
        if !delivered {
            return self.not_delivered(
                envelope,
                sender,
                Some(target),
                DeliveryFailure::TargetNotConnected,
            );
        }

        self.diagnostics.record(GatewayEvent::Delivered {
            from: sender.clone(),
            to: target.clone(),
            message_type: envelope.kind().to_string(),
        });
        RouteOutcome::Delivered { to: target.clone() }
    }

    fn not_delivered(
        &self,
        envelope: &Envelope,
        sender: &ClientId,
        target: Option<&ClientId>,
        reason: DeliveryFailure,
    ) -> RouteOutcome {
        self.diagnostics.record(GatewayEvent::NotDelivered {
            from: sender.clone(),
            target: target.cloned(),
            message_type: envelope.kind().to_string(),
            reason,
        });
        RouteOutcome::NotDelivered { reason }
    }
}
