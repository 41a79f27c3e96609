//! WebSocket message channel
//!
//! Adapts a `tokio-tungstenite` stream to [`MessageSink`] / [`MessageSource`].
//! One binary WebSocket message is one tunnel message; tungstenite already
//! joins continuation frames, so complete messages surface as single final
//! fragments.

use super::{ChannelEvent, MessageSink, MessageSource, TransportError};
use crate::protocol::{CloseReason, CLOSE_NO_STATUS};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// How long to wait for the closing handshake to finish after a close frame
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Stream type produced by [`connect`]
pub type ClientStream = MaybeTlsStream<TcpStream>;

impl From<WsError> for TransportError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::Io(e) => TransportError::Io(e),
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            e => TransportError::WebSocket(e.to_string()),
        }
    }
}

/// Outbound half of a WebSocket session
pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

/// Inbound half of a WebSocket session
pub struct WsSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
    closed: Option<CloseReason>,
}

/// Split an upgraded WebSocket into channel halves
pub fn split<S>(ws: WebSocketStream<S>) -> (WsSink<S>, WsSource<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (
        WsSink { inner: sink },
        WsSource {
            inner: stream,
            closed: None,
        },
    )
}

/// Open a client session to `url` (`ws://` or `wss://`)
pub async fn connect(
    url: &str,
) -> Result<(WsSink<ClientStream>, WsSource<ClientStream>), TransportError> {
    let (ws, response) = connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    debug!("Upgraded with status {}", response.status());
    Ok(split(ws))
}

fn to_close_frame(reason: &CloseReason) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(reason.code()),
        reason: Cow::Owned(reason.wire_detail().to_string()),
    }
}

fn from_close_frame(frame: Option<CloseFrame<'_>>) -> CloseReason {
    match frame {
        Some(frame) => CloseReason::from_code(u16::from(frame.code), frame.reason.into_owned()),
        None => CloseReason::from_code(CLOSE_NO_STATUS, ""),
    }
}

#[async_trait]
impl<S> MessageSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.inner.send(Message::Binary(payload.to_vec())).await?;
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        self.inner
            .send(Message::Close(Some(to_close_frame(&reason))))
            .await?;
        Ok(())
    }
}

impl<S> WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Keep polling so tungstenite can answer the close frame and the
    /// connection can wind down
    async fn drain(&mut self) {
        let inner = &mut self.inner;
        let drained = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
            while let Some(Ok(_)) = inner.next().await {}
        })
        .await;
        if drained.is_err() {
            debug!("Closing handshake did not finish in {:?}", CLOSE_DRAIN_TIMEOUT);
        }
    }

    fn finish(&mut self, reason: CloseReason) -> ChannelEvent {
        self.closed = Some(reason.clone());
        ChannelEvent::Closed(reason)
    }
}

#[async_trait]
impl<S> MessageSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_event(&mut self) -> Result<ChannelEvent, TransportError> {
        if let Some(reason) = &self.closed {
            return Ok(ChannelEvent::Closed(reason.clone()));
        }

        loop {
            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(ChannelEvent::Fragment { data, last: true });
                }
                Some(Ok(Message::Frame(frame))) => {
                    let last = frame.header().is_final;
                    return Ok(ChannelEvent::Fragment {
                        data: frame.into_data(),
                        last,
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = from_close_frame(frame);
                    trace!("Received close frame: {}", reason);
                    self.drain().await;
                    return Ok(self.finish(reason));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Text(_))) => {
                    return Err(TransportError::UnsupportedMessage("text"));
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) | None => {
                    return Ok(self.finish(CloseReason::abnormal("connection lost")));
                }
                Some(Err(WsError::Io(e))) => {
                    let reason = CloseReason::abnormal(format!("connection lost: {}", e));
                    return Ok(self.finish(reason));
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}
