//! MCP (Model Context Protocol) client support
//!
//! This module connects the host to external MCP servers and exposes their
//! tools to the orchestration loop.
//!
//! # Module Layout
//!
//! - `types`     -- MCP protocol types and JSON-RPC primitives
//! - `client`    -- Transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`  -- Typed MCP lifecycle wrapper over `JsonRpcClient`
//! - `session`   -- One handshaken server connection and its lifecycle
//! - `transport` -- `Transport` trait and concrete implementations (stdio,
//!   sse, fake)

pub mod client;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use session::{ServerSession, SessionOptions, SessionState};
