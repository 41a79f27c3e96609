//! Tunnel layer - per-session relays
//!
//! Provides:
//! - Client relay (local streams <-> message channel)
//! - Server relay (message channel <-> TCP destination, with half-close)
//! - One-shot latch used to sequence session shutdown

mod client;
mod latch;
mod server;

pub use client::ClientRelay;
pub use latch::Latch;
pub use server::{HalfClose, ServerRelay, ServerState, SessionReport};

use crate::protocol::{FragmentOutcome, MessageAssembler};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write one inbound fragment to the local side and act on the message
/// boundary: flush a completed message, shut down writes on end of stream.
///
/// Callers drop the writer once this returns `EndOfStream`; for some writers
/// `shutdown` is only a flush.
pub(crate) async fn write_fragment<W>(
    output: &mut W,
    assembler: &mut MessageAssembler,
    data: &[u8],
    last: bool,
) -> Result<FragmentOutcome, TunnelError>
where
    W: AsyncWrite + Unpin,
{
    if !data.is_empty() {
        output.write_all(data).await?;
    }
    let outcome = assembler.push(data.len(), last);
    match outcome {
        FragmentOutcome::Continue => {}
        FragmentOutcome::Flush => output.flush().await?,
        FragmentOutcome::EndOfStream => output.shutdown().await?,
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_fragment_boundaries() {
        let mut assembler = MessageAssembler::new();
        let (mut writer, mut reader) = tokio::io::duplex(64);

        let steps: [(&[u8], bool, FragmentOutcome); 4] = [
            (b"ab", false, FragmentOutcome::Continue),
            (b"c", true, FragmentOutcome::Flush),
            (b"", false, FragmentOutcome::Continue),
            (b"", true, FragmentOutcome::EndOfStream),
        ];
        for (data, last, expected) in steps {
            let outcome = write_fragment(&mut writer, &mut assembler, data, last)
                .await
                .unwrap();
            assert_eq!(outcome, expected);
        }

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abc");
    }
}
