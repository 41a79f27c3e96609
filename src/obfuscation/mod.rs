//! Traffic obfuscation layer
//!
//! Provides the per-session keystream scrambler applied to every payload
//! byte crossing the WebSocket, and the key that seeds it.
//!
//! ## Not encryption
//!
//! The scrambler only deters casual inspection of the tunneled stream. It
//! offers no confidentiality against anyone who can read the session URL,
//! and no integrity or authentication at all.

mod key;
mod scrambler;

pub use key::{KeyError, ObfuscationKey, Role, SessionCiphers};
pub use scrambler::{Scrambler, KEYSTREAM_BLOCK};
