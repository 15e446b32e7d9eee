//! In-process fake transport for MCP unit tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the [`FakeTransport`] into the code under test and use the
//! handle to:
//!
//! - Read what the client sent: `handle.outbound_rx.recv().await`
//! - Inject server messages: `handle.inbound_tx.send(json_string)`
//! - Simulate the peer hanging up: `handle.disconnect()`
//! - Simulate a broken channel: `handle.fail("reason")`
//!
//! [`FakeTransportHandle::remote`] hands out a cloneable [`FakeRemote`] so a
//! test can keep control of the peer after moving the handle into a
//! scripted server task.
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx -> inbound_tx  -----> inbound_rx  (client receive())
//! ```

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{McpHostError, Result};
use crate::mcp::transport::{Transport, TransportKind};

type FailureSlot = Arc<std::sync::Mutex<Option<String>>>;

/// In-process fake transport for use in tests.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    // Holds the inbound channel open; only `closed` ends the stream.
    _inbound_tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    failure: FailureSlot,
    kind: TransportKind,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let closed = CancellationToken::new();
        let failure: FailureSlot = Arc::new(std::sync::Mutex::new(None));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            _inbound_tx: inbound_tx.clone(),
            closed: closed.clone(),
            failure: Arc::clone(&failure),
            kind: TransportKind::Stdio,
        };

        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            closed,
            failure,
        };

        (transport, handle)
    }

    /// Report a different transport kind.
    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Receives messages that the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Sends server messages into the client's [`Transport::receive`] stream.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    failure: FailureSlot,
}

impl FakeTransportHandle {
    /// End the inbound stream as if the peer hung up.
    pub fn disconnect(&self) {
        self.remote().disconnect();
    }

    /// End the inbound stream and record a transport failure.
    pub fn fail(&self, reason: &str) {
        self.remote().fail(reason);
    }

    /// A cloneable controller for the peer side of this transport.
    pub fn remote(&self) -> FakeRemote {
        FakeRemote {
            inbound_tx: self.inbound_tx.clone(),
            closed: self.closed.clone(),
            failure: Arc::clone(&self.failure),
        }
    }
}

/// Cloneable peer-side controls for a [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct FakeRemote {
    inbound_tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    failure: FailureSlot,
}

impl FakeRemote {
    /// Push a server-originated message (e.g. a notification).
    pub fn push(&self, message: serde_json::Value) {
        let _ = self.inbound_tx.send(message.to_string());
    }

    /// End the inbound stream as if the peer hung up.
    pub fn disconnect(&self) {
        self.closed.cancel();
    }

    /// End the inbound stream and record a transport failure.
    pub fn fail(&self, reason: &str) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = Some(reason.to_string());
        }
        self.closed.cancel();
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(McpHostError::Transport("fake transport is closed".to_string()).into());
        }
        self.outbound_tx.send(message).map_err(|e| {
            McpHostError::Transport(format!("FakeTransport outbound channel closed: {}", e)).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        let closed = self.closed.clone();
        Box::pin(futures::stream::unfold(
            (rx, closed),
            |(rx, closed)| async move {
                let mut guard = rx.lock().await;
                let item = tokio::select! {
                    biased;
                    _ = closed.cancelled() => None,
                    item = guard.recv() => item,
                };
                drop(guard);
                let item = item?;
                Some((item, (rx, closed)))
            },
        ))
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_delivers_to_handle_outbound_rx() {
        let (transport, mut handle) = FakeTransport::new();

        transport
            .send(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string())
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");

        assert_eq!(received, r#"{"jsonrpc":"2.0","method":"ping"}"#);
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream_without_failure() {
        let (transport, handle) = FakeTransport::new();
        handle.disconnect();

        let mut stream = transport.receive();
        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("stream should end");
        assert!(next.is_none());
        assert!(transport.failure().is_none());
    }

    #[tokio::test]
    async fn test_fail_records_reason_and_rejects_sends() {
        let (transport, handle) = FakeTransport::new();
        handle.fail("connection reset");

        assert_eq!(transport.failure().as_deref(), Some("connection reset"));
        assert!(transport.send("{}".to_string()).await.is_err());
    }

    #[test]
    fn test_fake_transport_is_object_safe() {
        let (transport, _handle) = FakeTransport::new();
        let boxed: Box<dyn Transport> = Box::new(transport.with_kind(TransportKind::Sse));
        assert_eq!(boxed.kind(), TransportKind::Sse);
    }
}
