//! Client side of a tunnel session
//!
//! Pumps a local byte stream (normally stdin) into the message channel and
//! writes inbound payload to a local sink (normally stdout).

use super::write_fragment;
use crate::obfuscation::{ObfuscationKey, Role, Scrambler, SessionCiphers};
use crate::protocol::{
    CloseReason, FragmentOutcome, MessageAssembler, ProtocolError, READ_BUFFER_SIZE,
};
use crate::transport::{ChannelEvent, MessageSink, MessageSource, SessionChannel, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, error, warn};

/// Relay between local streams and one message channel session
pub struct ClientRelay {
    key: Option<ObfuscationKey>,
    errors: Arc<AtomicUsize>,
}

impl ClientRelay {
    /// Create a relay; `key` enables scrambling in both directions
    pub fn new(key: Option<ObfuscationKey>) -> Self {
        Self {
            key,
            errors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Errors counted so far
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Run the session until the channel closes and return the error count.
    ///
    /// `output` is dropped as soon as the peer's end-of-stream marker
    /// arrives, so a writer that owns its descriptor signals EOF downstream
    /// while input may still be flowing.
    ///
    /// The input reader runs on its own task and is not awaited: a blocked
    /// read on stdin cannot be cancelled, so it is left for process exit to
    /// reclaim.
    pub async fn run<K, S, R, W>(&self, sink: K, mut source: S, input: R, output: W) -> usize
    where
        K: MessageSink + 'static,
        S: MessageSource,
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let channel = Arc::new(SessionChannel::new(sink));
        let (send_cipher, mut recv_cipher) = match self.key {
            Some(key) => {
                let (send, recv) = SessionCiphers::for_role(key, Role::Client).split();
                (Some(send), Some(recv))
            }
            None => (None, None),
        };

        tokio::spawn(pump_input(
            channel.clone(),
            input,
            send_cipher,
            self.errors.clone(),
        ));

        let mut assembler = MessageAssembler::new();
        let mut output = Some(output);
        let mut end_of_stream = false;
        loop {
            let event = match source.next_event().await {
                Ok(event) => event,
                Err(e) => {
                    error!("Session error: {}", e);
                    self.count_error();
                    if !channel.is_open() {
                        break;
                    }
                    if let Err(e) = channel.close(CloseReason::unexpected(e.to_string())).await {
                        debug!("Failed to send close: {}", e);
                    }
                    continue;
                }
            };

            match event {
                ChannelEvent::Fragment { mut data, last } => {
                    // A failed output discards the rest without further errors
                    let Some(out) = output.as_mut() else {
                        if end_of_stream && !data.is_empty() {
                            warn!("{}", ProtocolError::DataAfterEndOfStream);
                            self.count_error();
                        }
                        continue;
                    };
                    if let Some(cipher) = recv_cipher.as_mut() {
                        cipher.apply(&mut data);
                    }
                    match write_fragment(out, &mut assembler, &data, last).await {
                        Ok(FragmentOutcome::EndOfStream) => {
                            output = None;
                            end_of_stream = true;
                            debug!("Peer reached end of stream, output closed");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("Error writing output: {}", e);
                            self.count_error();
                            output = None;
                        }
                    }
                }
                ChannelEvent::Closed(reason) => {
                    channel.mark_closed();
                    if reason.is_normal() {
                        debug!("Session closed: {}", reason);
                    } else {
                        warn!("Session closed: {}", reason);
                        self.count_error();
                    }
                    break;
                }
            }
        }

        self.errors()
    }

    fn count_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forward local input to the channel until EOF, error or session close
async fn pump_input<K, R>(
    channel: Arc<SessionChannel<K>>,
    mut input: R,
    mut cipher: Option<Scrambler>,
    errors: Arc<AtomicUsize>,
) where
    K: MessageSink,
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match input.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                error!("Error reading input: {}", e);
                errors.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        if n == 0 {
            match channel.send(&[]).await {
                Ok(()) => debug!("Input reached end of stream"),
                // Nothing was left unsent
                Err(TransportError::Closed) => {}
                Err(e) => {
                    error!("Error sending end of stream: {}", e);
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            }
            return;
        }

        let chunk = &mut buf[..n];
        if let Some(cipher) = cipher.as_mut() {
            cipher.apply(chunk);
        }
        if let Err(e) = channel.send(chunk).await {
            match e {
                TransportError::Closed => warn!("Session closed before input was fully sent"),
                e => error!("Error sending input: {}", e),
            }
            errors.fetch_add(1, Ordering::SeqCst);
            return;
        }
    }
}
