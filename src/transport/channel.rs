//! Shared handle to a session's outbound half

use super::{MessageSink, TransportError};
use crate::protocol::CloseReason;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;

/// Outbound half of one session, shared by the reader task and the inbound
/// handler.
///
/// Sends are serialized. Once the session is closed, locally or by the
/// peer, every further send fails with [`TransportError::Closed`].
pub struct SessionChannel<K> {
    sink: Mutex<K>,
    open: AtomicBool,
    local_close: StdMutex<Option<CloseReason>>,
}

impl<K: MessageSink> SessionChannel<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink: Mutex::new(sink),
            open: AtomicBool::new(true),
            local_close: StdMutex::new(None),
        }
    }

    /// Whether the session may still carry messages
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Send one complete message
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        sink.send(payload).await
    }

    /// Start closing the session.
    ///
    /// Returns `Ok(false)` without sending anything if the session was
    /// already closed.
    pub async fn close(&self, reason: CloseReason) -> Result<bool, TransportError> {
        let mut sink = self.sink.lock().await;
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        *self
            .local_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.clone());
        sink.close(reason).await?;
        Ok(true)
    }

    /// Record that the peer ended the session
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Reason this side closed with, if it initiated the close
    pub fn local_close_reason(&self) -> Option<CloseReason> {
        self.local_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<Vec<u8>>,
        closes: Vec<CloseReason>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
            self.sent.push(payload.to_vec());
            Ok(())
        }

        async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
            self.closes.push(reason);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_once() {
        let channel = SessionChannel::new(RecordingSink::default());
        channel.send(b"abc").await.unwrap();

        assert!(channel.close(CloseReason::normal("Bye")).await.unwrap());
        assert!(!channel
            .close(CloseReason::unexpected("late"))
            .await
            .unwrap());
        assert!(!channel.is_open());
        assert_eq!(channel.local_close_reason(), Some(CloseReason::normal("Bye")));

        assert!(matches!(
            channel.send(b"more").await,
            Err(TransportError::Closed)
        ));

        let sink = channel.sink.into_inner();
        assert_eq!(sink.sent, vec![b"abc".to_vec()]);
        assert_eq!(sink.closes, vec![CloseReason::normal("Bye")]);
    }

    #[tokio::test]
    async fn test_remote_close_blocks_sends() {
        let channel = SessionChannel::new(RecordingSink::default());
        channel.mark_closed();

        assert!(matches!(channel.send(b"x").await, Err(TransportError::Closed)));
        assert!(!channel.close(CloseReason::normal("Bye")).await.unwrap());
        assert_eq!(channel.local_close_reason(), None);
    }
}
