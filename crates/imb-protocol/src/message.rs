use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{ClientId, ProtocolError, Role};

/// Every frame the gateway understands, discriminated on `type`.
///
/// Frames with a `type` the gateway does not know decode to
/// [`GatewayMessage::Unknown`] rather than failing. Fields the gateway only
/// carries are kept as raw JSON, and addressing fields of the wrong JSON
/// type read as absent, so any JSON object with a string `type` decodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayMessage {
    /// Handshake: server ack carrying the assigned id, or client role declaration.
    Connect(Connect),
    /// Consumer → agent command.
    Cmd(Command),
    /// Agent → consumer command result.
    Result(CommandResult),
    Ping(Heartbeat),
    Pong(Heartbeat),
    /// Reserved; the gateway never emits it.
    Disconnect(Disconnect),
    #[serde(other)]
    Unknown,
}

impl GatewayMessage {
    /// Handshake acknowledgment sent as soon as a socket is accepted.
    pub fn connect_ack(client_id: ClientId, timestamp: i64) -> Self {
        GatewayMessage::Connect(Connect {
            client_id: Some(client_id),
            client_type: None,
            timestamp: Some(timestamp.into()),
        })
    }

    /// Client-side role declaration completing the handshake.
    pub fn declare_role(role: Role) -> Self {
        GatewayMessage::Connect(Connect {
            client_id: None,
            client_type: Some(role),
            timestamp: None,
        })
    }

    pub fn ping(timestamp: i64) -> Self {
        GatewayMessage::Ping(Heartbeat {
            timestamp: Some(timestamp.into()),
        })
    }

    pub fn pong(timestamp: i64) -> Self {
        GatewayMessage::Pong(Heartbeat {
            timestamp: Some(timestamp.into()),
        })
    }

    /// The `type` discriminator this variant serializes with.
    pub fn type_name(&self) -> &'static str {
        match self {
            GatewayMessage::Connect(_) => "connect",
            GatewayMessage::Cmd(_) => "cmd",
            GatewayMessage::Result(_) => "result",
            GatewayMessage::Ping(_) => "ping",
            GatewayMessage::Pong(_) => "pong",
            GatewayMessage::Disconnect(_) => "disconnect",
            GatewayMessage::Unknown => "unknown",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connect {
    #[serde(
        default,
        deserialize_with = "lenient_client_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id: Option<ClientId>,
    /// Unknown role names read as `None`, leaving the handshake pending.
    #[serde(
        default,
        deserialize_with = "lenient_role",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_type: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Agent the command is addressed to.
    #[serde(
        default,
        alias = "target_client_id",
        deserialize_with = "lenient_client_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    #[serde(default, alias = "cmd_id", skip_serializing_if = "Option::is_none")]
    pub cmd_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(
        default,
        alias = "target_client_id",
        deserialize_with = "lenient_client_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_client_id: Option<ClientId>,
    /// Consumer that issued the command. Older agents address results with
    /// this field instead of `targetClientId`.
    #[serde(
        default,
        alias = "from_client_id",
        deserialize_with = "lenient_client_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub from_client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl CommandResult {
    /// Consumer this result should be delivered to.
    pub fn recipient(&self) -> Option<&ClientId> {
        self.target_client_id
            .as_ref()
            .or(self.from_client_id.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Disconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
}

/// Only a JSON string names a client.
fn lenient_client_id<'de, D>(deserializer: D) -> Result<Option<ClientId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => Some(ClientId::from(id)),
        _ => None,
    })
}

fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(role) => role.parse().ok(),
        _ => None,
    })
}

/// snake_case spellings accepted for camelCase fields.
const FIELD_ALIASES: [(&str, &str); 3] = [
    ("targetClientId", "target_client_id"),
    ("fromClientId", "from_client_id"),
    ("cmdId", "cmd_id"),
];

/// Drop a snake_case field when its camelCase twin is present, so a frame
/// carrying both decodes with the camelCase value.
fn drop_shadowed_aliases(value: &mut Value) {
    if let Value::Object(fields) = value {
        for (camel, snake) in FIELD_ALIASES {
            if fields.contains_key(camel) {
                fields.remove(snake);
            }
        }
    }
}

/// A decoded inbound frame together with its original text.
///
/// Forwarding uses [`Envelope::raw`] so peers receive exactly the bytes the
/// sender wrote, including fields the gateway does not model.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message: GatewayMessage,
    kind: String,
    raw: String,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut value: Value = serde_json::from_str(text)?;
        drop_shadowed_aliases(&mut value);
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        let message = GatewayMessage::deserialize(&value)?;
        Ok(Self {
            message,
            kind,
            raw: text.to_string(),
        })
    }

    /// The `type` string as sent, including values the gateway does not know.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}
