//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all MCP transport
//! implementations must satisfy. Concrete implementations live in
//! submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`sse::SseTransport`] -- HTTP+SSE transport: a long-lived event stream
//!   for inbound messages and HTTP POSTs to the advertised endpoint for
//!   outbound ones.
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).
//!
//! # Design
//!
//! Callers `send` a serialized JSON-RPC string and `receive` a stream of
//! serialized JSON-RPC strings (one per logical message). Framing and
//! reconnection are the responsibility of each concrete implementation.
//!
//! The inbound stream ends when the channel is gone. A transport that gave
//! up (rather than being closed by either side) reports why through
//! [`Transport::failure`].

use std::fmt;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which channel a server is reached over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON over stdin/stdout
    #[default]
    Stdio,
    /// Remote server speaking HTTP+SSE
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// Abstraction over MCP transport implementations.
///
/// All methods are `async` or return pinned [`Stream`]s so that transport
/// implementations can drive I/O without blocking the Tokio executor. The
/// session layer uses transports polymorphically through
/// `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// The transport is responsible for any framing required by the
    /// underlying medium (a trailing newline for stdio, an HTTP POST for
    /// sse).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpHostError::Transport`] if the message
    /// could not be delivered.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// Each item is a single, complete JSON object. The stream ends when the
    /// transport is closed, the remote peer disconnects, or the transport
    /// gives up reconnecting.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Returns a stream of transport-level diagnostic strings.
    ///
    /// For stdio transports this carries lines written to the child
    /// process's stderr. Diagnostic output is never an error condition.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    /// Release the underlying channel.
    ///
    /// After `close` returns, the inbound stream ends and further sends
    /// fail. Closing twice is a no-op.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Why the transport stopped on its own, if it did.
    ///
    /// `None` while healthy and after an orderly close or remote
    /// disconnect.
    fn failure(&self) -> Option<String> {
        None
    }

    /// The kind of channel this transport drives.
    fn kind(&self) -> TransportKind;
}

pub mod sse;
pub mod stdio;

#[cfg(test)]
pub mod fake;
