//! Transport layer
//!
//! The relays never talk to a WebSocket directly. They see the message
//! channel through two narrow traits:
//! - [`MessageSink`]: send one complete binary message, or start closing
//! - [`MessageSource`]: receive the next inbound fragment or the close event
//!
//! [`websocket`] implements both over `tokio-tungstenite`; [`tls`] loads the
//! certificate material for `wss://` listeners.

mod channel;
pub mod tls;
pub mod websocket;

pub use channel::SessionChannel;

use crate::protocol::CloseReason;
use async_trait::async_trait;
use std::io;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Unsupported {0} message")]
    UnsupportedMessage(&'static str),

    #[error("Connection closed")]
    Closed,
}

/// Inbound activity on a message channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Part of a binary message; `last` marks the final fragment
    Fragment { data: Vec<u8>, last: bool },
    /// The session is over
    Closed(CloseReason),
}

/// Outbound half of a message channel
#[async_trait]
pub trait MessageSink: Send {
    /// Send `payload` as one complete binary message
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Start the closing handshake
    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError>;
}

/// Inbound half of a message channel
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next fragment or the close event.
    ///
    /// After `Closed` has been returned the session is finished; further
    /// calls keep reporting it closed.
    async fn next_event(&mut self) -> Result<ChannelEvent, TransportError>;
}
