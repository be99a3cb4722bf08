use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

const ID_SUFFIX_LEN: usize = 9;
const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Which side of the relay a connection speaks for.
///
/// The wire names predate the gateway: agents announce themselves as
/// `openclaw`, consumers as `app`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "openclaw")]
    Agent,
    #[serde(rename = "app")]
    Consumer,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Agent, Role::Consumer];

    /// Wire name of the role.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "openclaw",
            Role::Consumer => "app",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openclaw" => Ok(Role::Agent),
            "app" => Ok(Role::Consumer),
            other => Err(ProtocolError::UnknownRole(other.to_string())),
        }
    }
}

/// Opaque per-connection identity assigned by the gateway.
///
/// Used only as a routing key. Identities are never reused across
/// reconnects: a client that reconnects gets a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a new identity of the form `client_<epoch-millis>_<suffix>`.
    ///
    /// Collisions are not structurally prevented; the millisecond prefix plus
    /// a 9-character base-36 suffix makes them negligible.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..ID_SUFFIX_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        Self(format!("client_{}_{}", crate::timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
