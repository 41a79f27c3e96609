//! # wstcp
//!
//! Tunnels a TCP byte stream through a WebSocket session.
//!
//! The client pumps its standard input into a WebSocket and writes what comes
//! back to standard output. The server maps each upgrade path to a fixed TCP
//! destination, dials it per session and relays both directions, honouring
//! half-close so request/response protocols drain fully.
//!
//! ## Architecture
//!
//! ```text
//! stdin/stdout ── ClientRelay ══ WebSocket ══ ServerRelay ── TCP destination
//!                     │                            │
//!                 Scrambler (optional, keyed per session, one per direction)
//! ```
//!
//! Each direction is a sequence of binary messages; an empty message marks
//! end of stream. See [`protocol`] for the details.

pub mod config;
pub mod obfuscation;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key error: {0}")]
    Key(#[from] obfuscation::KeyError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] config::EndpointError),

    #[error("Route error: {0}")]
    Route(#[from] config::RouteError),

    #[error("Configuration error: {0}")]
    Config(String),
}
