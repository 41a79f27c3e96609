//! Protocol definitions and constants
//!
//! The wire protocol is deliberately thin. Each direction of a tunnel is a
//! sequence of binary WebSocket messages:
//!
//! - a non-empty message carries the next chunk of the byte stream (at most
//!   [`READ_BUFFER_SIZE`] bytes, scrambled if the session has a key)
//! - an empty message is the end-of-stream marker: the sender's source hit
//!   EOF and nothing more follows in that direction
//!
//! The optional scrambling key travels as the `key` query parameter of the
//! upgrade request.

mod assembler;
mod close;

pub use assembler::{FragmentOutcome, MessageAssembler};
pub use close::{
    CloseReason, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS, CLOSE_POLICY_VIOLATION,
    CLOSE_UNEXPECTED_CONDITION, MAX_CLOSE_DETAIL,
};

use crate::obfuscation::{KeyError, ObfuscationKey};
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("Key parameter given {0} times")]
    DuplicateKey(usize),

    #[error("Data received after end of stream")]
    DataAfterEndOfStream,
}

/// Size of the local read buffer; bounds the payload of one message
pub const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Query parameter carrying the scrambling key
pub const KEY_PARAM: &str = "key";

/// Extract the session key from an upgrade request's query string.
///
/// Returns `Ok(None)` when no `key` parameter is present.
pub fn session_key(query: Option<&str>) -> Result<Option<ObfuscationKey>, ProtocolError> {
    let values: Vec<&str> = query
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (name == KEY_PARAM).then_some(value)
        })
        .collect();

    match values.as_slice() {
        [] => Ok(None),
        [value] => Ok(Some(value.parse()?)),
        _ => Err(ProtocolError::DuplicateKey(values.len())),
    }
}

/// Append the session key to an existing (possibly empty) query string
pub fn with_session_key(query: Option<&str>, key: ObfuscationKey) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{}&{}={}", q, KEY_PARAM, key.to_hex()),
        _ => format!("{}={}", KEY_PARAM, key.to_hex()),
    }
}
