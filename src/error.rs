//! Error types for mcphost
//!
//! This module defines the error taxonomy used throughout the host, using
//! `thiserror` for the typed variants and `anyhow` for propagation.
//!
//! Transport- and session-level failures raised while a tool call is in
//! flight are converted into tool-result payloads by the orchestration loop;
//! adapter and configuration failures abort the current operation and reach
//! the caller.

use std::time::Duration;

use thiserror::Error;

/// Main error type for mcphost operations
#[derive(Error, Debug)]
pub enum McpHostError {
    /// Connection-level failure on a transport channel (possibly retryable)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The owning session is not in the `ready` state
    #[error("Session unavailable: server `{server}` is {state}")]
    SessionUnavailable {
        /// Identifier of the server whose session rejected the operation
        server: String,
        /// The session state at the time of rejection
        state: String,
    },

    /// A tool invocation exceeded its configured timeout
    #[error("Tool `{tool}` timed out after {timeout:?}")]
    ToolTimeout {
        /// Catalog name of the tool
        tool: String,
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// A tool executed but reported a failure
    #[error("Tool error: {0}")]
    Tool(String),

    /// No tool with the given name is registered in the catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The model backend's response could not be interpreted
    #[error("Adapter protocol error: {0}")]
    AdapterProtocol(String),

    /// Invalid server or provider setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The MCP initialize exchange failed
    #[error("Handshake with `{server}` failed: {message}")]
    Handshake {
        /// Identifier of the server
        server: String,
        /// Reason the handshake failed
        message: String,
    },

    /// The server selected a protocol revision this host does not speak
    #[error("Unsupported protocol version `{got}` (expected one of {expected:?})")]
    ProtocolVersion {
        /// Versions this host accepts
        expected: Vec<String>,
        /// Version the server selected
        got: String,
    },

    /// A JSON-RPC request did not receive a response in time
    #[error("Request `{method}` to `{server}` timed out after {timeout:?}")]
    RequestTimeout {
        /// Identifier of the server
        server: String,
        /// JSON-RPC method that timed out
        method: String,
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// The server answered with a JSON-RPC error object
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message reported by the server
        message: String,
    },

    /// Model backend request failures (HTTP status, connection)
    #[error("Provider error: {0}")]
    Provider(String),

    /// The model backend did not complete in time
    #[error("Model completion timed out after {0:?}")]
    CompletionTimeout(Duration),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl McpHostError {
    /// Whether a single session-level retry may succeed for this error
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::error::McpHostError;
    ///
    /// assert!(McpHostError::Transport("broken pipe".into()).is_retryable());
    /// assert!(!McpHostError::Tool("bad input".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, McpHostError::Transport(_))
    }
}

/// Result type alias for mcphost operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
