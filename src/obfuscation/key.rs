//! Session obfuscation keys

use super::Scrambler;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("empty key")]
    Empty,

    #[error("invalid hexadecimal key '{0}'")]
    InvalidHex(String),
}

/// Which end of the tunnel a set of ciphers belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The side that opens the WebSocket session
    Client,
    /// The side that dials the destination
    Server,
}

/// 64-bit seed shared by both ends of one session.
///
/// Carried in clear as the `key` query parameter, so anyone who sees the
/// session URL can undo the scrambling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObfuscationKey(u64);

impl ObfuscationKey {
    /// Wrap a raw key value
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Derive a key from the nanosecond wall clock
    pub fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(nanos as u64)
    }

    /// Raw key value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Lowercase hexadecimal form, as sent in the query string
    pub fn to_hex(&self) -> String {
        format!("{:x}", self.0)
    }
}

impl FromStr for ObfuscationKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| KeyError::InvalidHex(s.to_string()))
    }
}

impl fmt::Display for ObfuscationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Send and receive scramblers for one session.
///
/// The two directions are seeded with the key and its bitwise complement so
/// they never share a keystream.
#[derive(Debug, Clone)]
pub struct SessionCiphers {
    /// Applied to outbound payload just before sending
    pub send: Scrambler,
    /// Applied to inbound payload just after receipt
    pub recv: Scrambler,
}

impl SessionCiphers {
    /// Build the cipher pair for one end of a session
    pub fn for_role(key: ObfuscationKey, role: Role) -> Self {
        let (send_seed, recv_seed) = match role {
            Role::Client => (key.0, !key.0),
            Role::Server => (!key.0, key.0),
        };
        Self {
            send: Scrambler::new(send_seed),
            recv: Scrambler::new(recv_seed),
        }
    }

    /// Split into `(send, recv)`
    pub fn split(self) -> (Scrambler, Scrambler) {
        (self.send, self.recv)
    }
}
