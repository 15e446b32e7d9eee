//! mcphost - MCP host library
//!
//! This library connects a language model to any number of MCP
//! (Model Context Protocol) tool servers and drives the conversation
//! between them.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: Transports (stdio, SSE), the JSON-RPC client and server sessions
//! - `tools`: The merged tool catalog and tool call/result types
//! - `providers`: Model adapter abstraction and the Ollama adapter
//! - `agent`: Conversation window and the orchestration loop
//! - `host`: Process-wide context that ties sessions, catalog and adapter together
//! - `config`: Configuration management and validation
//! - `retry`: Exponential backoff shared by reconnects and HTTP retries
//! - `error`: Error types and result aliases
//! - `cli` and `commands`: Command-line interface and interactive chat
//!
//! # Example
//!
//! ```no_run
//! use mcphost::{Config, HostContext};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.json", &Default::default())?;
//!     let mut host = HostContext::start(config).await?;
//!
//!     let outcome = host
//!         .orchestrator()
//!         .run_turn("What's the weather in Paris?", &CancellationToken::new())
//!         .await?;
//!     println!("{:?}", outcome.text());
//!
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod mcp;
pub mod providers;
pub mod retry;
pub mod tools;

// Re-export commonly used types
pub use agent::{ConversationStore, Orchestrator, TurnOutcome};
pub use config::Config;
pub use error::{McpHostError, Result};
pub use host::{HostContext, ServerStatus};
pub use tools::ToolCatalog;

#[cfg(test)]
pub mod test_utils;
