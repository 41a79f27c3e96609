//! Inbound message reassembly
//!
//! The carrier may split one logical message into several fragments. Payload
//! is forwarded fragment by fragment, but the decision to flush or to treat
//! the message as the end-of-stream marker can only be made once the final
//! fragment arrives and the total length is known.

/// What to do after forwarding one fragment's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// More fragments of this message follow
    Continue,
    /// A non-empty message is complete; flush the local writer
    Flush,
    /// An empty message is complete; the peer's source reached EOF
    EndOfStream,
}

/// Tracks the length of the logical message currently being received
#[derive(Debug, Default)]
pub struct MessageAssembler {
    total_len: usize,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a fragment of `len` bytes
    pub fn push(&mut self, len: usize, last: bool) -> FragmentOutcome {
        self.total_len += len;
        if !last {
            return FragmentOutcome::Continue;
        }
        if std::mem::take(&mut self.total_len) > 0 {
            FragmentOutcome::Flush
        } else {
            FragmentOutcome::EndOfStream
        }
    }

    /// Bytes received so far for the unfinished message
    pub fn pending(&self) -> usize {
        self.total_len
    }
}
