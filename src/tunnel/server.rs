//! Server side of a tunnel session
//!
//! Each accepted session dials its destination and runs two flows:
//! - the inbound handler writes channel payload to the socket and shuts down
//!   the socket's write side on the peer's end-of-stream marker
//! - the reader task forwards destination bytes to the channel, sends its own
//!   end-of-stream marker on EOF, then waits for the inbound side to finish
//!   before closing the session normally
//!
//! The destination socket is fully closed only once both directions have
//! drained.

use super::{write_fragment, Latch};
use crate::config::Destination;
use crate::obfuscation::{Role, Scrambler, SessionCiphers};
use crate::protocol::{
    session_key, CloseReason, FragmentOutcome, MessageAssembler, ProtocolError, READ_BUFFER_SIZE,
};
use crate::transport::{ChannelEvent, MessageSink, MessageSource, SessionChannel, TransportError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, error, info, warn};

/// How long to wait for the peer to answer our close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Which direction of an open session has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfClose {
    /// The destination reached EOF and our end-of-stream marker was sent
    Local,
    /// The peer's end-of-stream marker arrived and socket writes are shut down
    Remote,
}

/// Server session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Dialing,
    Open,
    HalfClosing(HalfClose),
    Closing,
    Closed,
    /// Absorbing: no later transition leaves it
    Failed,
}

impl ServerState {
    fn half_close(self, side: HalfClose) -> Self {
        match self {
            ServerState::Open => ServerState::HalfClosing(side),
            ServerState::HalfClosing(done) if done != side => ServerState::Closing,
            state => state,
        }
    }
}

/// Outcome of one server session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub state: ServerState,
    pub errors: usize,
}

/// Relay between one message channel session and one TCP destination
#[derive(Debug, Clone)]
pub struct ServerRelay {
    id: u64,
    destination: Destination,
}

/// State shared by the inbound handler and the reader task
struct Session<K> {
    id: u64,
    destination: Destination,
    channel: SessionChannel<K>,
    state: Mutex<ServerState>,
    errors: AtomicUsize,
    /// Released once socket writes are shut down
    half_closed: Latch,
    /// Released when the session is over and the socket must go
    teardown: Latch,
}

impl<K: MessageSink> Session<K> {
    fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, f: impl FnOnce(ServerState) -> ServerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ServerState::Failed {
            *state = f(*state);
        }
    }

    fn set_state(&self, next: ServerState) {
        self.transition(|_| next);
    }

    fn mark_failed(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ServerState::Failed;
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Enter `Failed`, close the session and let the reader unwind
    async fn fail(&self, reason: CloseReason) {
        self.mark_failed();
        warn!("Session {} failed: {}", self.id, reason);
        match self.channel.close(reason).await {
            Ok(true) => {}
            Ok(false) => debug!("Session {} was already closed", self.id),
            Err(e) => debug!("Session {} could not send close: {}", self.id, e),
        }
        self.teardown.release();
    }

    /// Handle the end of the channel session
    fn finish(&self, reason: CloseReason) {
        self.channel.mark_closed();
        if reason.is_normal() || self.channel.local_close_reason().is_some() {
            self.set_state(ServerState::Closed);
            info!("Session {} closed: {}", self.id, reason);
        } else {
            self.mark_failed();
            warn!("Session {} closed by peer: {}", self.id, reason);
        }
        self.teardown.release();
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            state: self.state(),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

impl ServerRelay {
    pub fn new(id: u64, destination: Destination) -> Self {
        Self { id, destination }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Serve one session until it closes.
    ///
    /// `query` is the upgrade request's query string; its optional `key`
    /// parameter turns on scrambling. The destination socket is closed by
    /// the time this returns.
    pub async fn run<K, S>(&self, sink: K, mut source: S, query: Option<&str>) -> SessionReport
    where
        K: MessageSink + 'static,
        S: MessageSource,
    {
        let session = Arc::new(Session {
            id: self.id,
            destination: self.destination.clone(),
            channel: SessionChannel::new(sink),
            state: Mutex::new(ServerState::Idle),
            errors: AtomicUsize::new(0),
            half_closed: Latch::new(),
            teardown: Latch::new(),
        });

        let key = match session_key(query) {
            Ok(key) => key,
            Err(e) => {
                warn!("Session {} rejected: {}", self.id, e);
                session.errors.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = session
                    .channel
                    .close(CloseReason::policy_violation("invalid key"))
                    .await
                {
                    debug!("Session {} could not send close: {}", self.id, e);
                }
                await_close(&session, &mut source).await;
                return session.report();
            }
        };
        let (send_cipher, recv_cipher) = match key {
            Some(key) => {
                let (send, recv) = SessionCiphers::for_role(key, Role::Server).split();
                (Some(send), Some(recv))
            }
            None => (None, None),
        };

        session.set_state(ServerState::Dialing);
        debug!("Session {} dialing {}", self.id, self.destination);
        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(reason) => {
                session.fail(reason).await;
                await_close(&session, &mut source).await;
                return session.report();
            }
        };

        session.set_state(ServerState::Open);
        info!(
            "Session {} connected to {}{}",
            self.id,
            self.destination,
            if key.is_some() { " (scrambled)" } else { "" }
        );

        let (reader, writer) = stream.into_split();
        let pump = tokio::spawn(pump_destination(session.clone(), reader, send_cipher));
        relay_inbound(&session, &mut source, writer, recv_cipher).await;

        session.teardown.release();
        if let Err(e) = pump.await {
            error!("Session {} reader task failed: {}", self.id, e);
        }
        session.report()
    }

    async fn dial(&self) -> Result<TcpStream, CloseReason> {
        let dest = &self.destination;
        let addrs: Vec<SocketAddr> = match lookup_host((dest.host(), dest.port())).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!("Session {} lookup of {} failed: {}", self.id, dest.host(), e);
                Vec::new()
            }
        };
        if addrs.is_empty() {
            return Err(CloseReason::unexpected("Could not resolve"));
        }

        let stream = TcpStream::connect(addrs.as_slice())
            .await
            .map_err(|e| CloseReason::unexpected(format!("Could not connect: {}", e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Session {} could not disable Nagle: {}", self.id, e);
        }
        Ok(stream)
    }
}

/// Next inbound event, bounded once this side has started closing
async fn next_event<K, S>(
    session: &Session<K>,
    source: &mut S,
) -> Result<ChannelEvent, TransportError>
where
    K: MessageSink,
    S: MessageSource,
{
    if session.channel.is_open() {
        return source.next_event().await;
    }
    match tokio::time::timeout(CLOSE_TIMEOUT, source.next_event()).await {
        Ok(event) => event,
        Err(_) => Ok(ChannelEvent::Closed(CloseReason::abnormal(
            "closing handshake timed out",
        ))),
    }
}

/// Discard inbound traffic until the peer acknowledges our close
async fn await_close<K, S>(session: &Session<K>, source: &mut S)
where
    K: MessageSink,
    S: MessageSource,
{
    loop {
        match next_event(session, source).await {
            Ok(ChannelEvent::Fragment { .. }) => continue,
            Ok(ChannelEvent::Closed(reason)) => {
                debug!("Session {} closed: {}", session.id, reason);
                break;
            }
            Err(e) => {
                debug!("Session {} error while closing: {}", session.id, e);
                break;
            }
        }
    }
    session.channel.mark_closed();
}

/// Channel to socket
async fn relay_inbound<K, S>(
    session: &Session<K>,
    source: &mut S,
    writer: OwnedWriteHalf,
    mut cipher: Option<Scrambler>,
) where
    K: MessageSink,
    S: MessageSource,
{
    let mut writer = Some(writer);
    let mut assembler = MessageAssembler::new();
    let mut end_of_stream = false;

    loop {
        let event = match next_event(session, source).await {
            Ok(event) => event,
            Err(e) if session.channel.is_open() => {
                writer = None;
                session
                    .fail(CloseReason::unexpected(format!("IO error on session: {}", e)))
                    .await;
                continue;
            }
            Err(e) => {
                debug!("Session {} error while closing: {}", session.id, e);
                session.channel.mark_closed();
                break;
            }
        };

        match event {
            ChannelEvent::Fragment { mut data, last } => {
                let Some(w) = writer.as_mut() else {
                    if end_of_stream && !data.is_empty() {
                        end_of_stream = false;
                        let reason = ProtocolError::DataAfterEndOfStream.to_string();
                        session.fail(CloseReason::policy_violation(reason)).await;
                    }
                    continue;
                };
                if let Some(cipher) = cipher.as_mut() {
                    cipher.apply(&mut data);
                }
                match write_fragment(w, &mut assembler, &data, last).await {
                    Ok(FragmentOutcome::EndOfStream) => {
                        writer = None;
                        end_of_stream = true;
                        debug!(
                            "Session {} shut down writes to {}",
                            session.id, session.destination
                        );
                        session.transition(|s| s.half_close(HalfClose::Remote));
                        session.half_closed.release();
                    }
                    Ok(_) => {}
                    Err(e) => {
                        writer = None;
                        let reason = format!("IO error writing to {}: {}", session.destination, e);
                        session.fail(CloseReason::unexpected(reason)).await;
                    }
                }
            }
            ChannelEvent::Closed(reason) => {
                session.finish(reason);
                break;
            }
        }
    }
}

/// Socket to channel
async fn pump_destination<K: MessageSink>(
    session: Arc<Session<K>>,
    mut reader: OwnedReadHalf,
    mut cipher: Option<Scrambler>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            _ = session.teardown.wait() => {
                debug!("Session {} reader unwinding", session.id);
                return;
            }
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let reason = format!("IO error reading from {}: {}", session.destination, e);
                session.fail(CloseReason::unexpected(reason)).await;
                return;
            }
        };

        let chunk = &mut buf[..n];
        if let Some(cipher) = cipher.as_mut() {
            cipher.apply(chunk);
        }
        if let Err(e) = session.channel.send(chunk).await {
            send_failed(&session, e).await;
            return;
        }
    }

    debug!("Session {} destination reached end of stream", session.id);
    if let Err(e) = session.channel.send(&[]).await {
        send_failed(&session, e).await;
        return;
    }
    session.transition(|s| s.half_close(HalfClose::Local));

    tokio::select! {
        _ = session.half_closed.wait() => {}
        _ = session.teardown.wait() => {
            debug!("Session {} reader unwinding", session.id);
            return;
        }
    }

    drop(reader);
    session.set_state(ServerState::Closing);
    if let Err(e) = session.channel.close(CloseReason::normal("Bye")).await {
        debug!("Session {} could not send close: {}", session.id, e);
    }
}

async fn send_failed<K: MessageSink>(session: &Session<K>, e: TransportError) {
    match e {
        // The inbound handler owns the close
        TransportError::Closed => debug!("Session {} closed while sending", session.id),
        e => {
            let reason = format!("IO error sending to client: {}", e);
            session.fail(CloseReason::unexpected(reason)).await;
        }
    }
}
