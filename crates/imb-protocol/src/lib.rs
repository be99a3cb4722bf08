//! # imb-protocol
//!
//! Wire types shared by the IM-bot relay gateway and its clients.
//! Every frame is a UTF-8 JSON object discriminated by its `type` field.

mod identity;
mod message;

pub use identity::{ClientId, Role};
pub use message::{
    Command, CommandResult, Connect, Disconnect, Envelope, GatewayMessage, Heartbeat,
};

/// Default WebSocket listen port.
pub const DEFAULT_PORT: u16 = 8767;

/// Errors raised while decoding frames or protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("unknown client type: {0}")]
    UnknownRole(String),
}

/// Current wall-clock time as Unix epoch milliseconds.
pub fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
