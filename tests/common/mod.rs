//! Shared helpers for integration tests
//!
//! - [`ScriptedTransport`]: an MCP server living inside a [`Transport`]
//!   implementation, so sessions can be built without a subprocess.
//! - [`ScriptedAdapter`]: a model adapter that replays canned responses and
//!   records every conversation it was shown.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mcphost::error::{McpHostError, Result};
use mcphost::mcp::transport::{Transport, TransportKind};
use mcphost::mcp::{ServerSession, SessionOptions};
use mcphost::providers::{CompletionParams, Message, ModelAdapter, Response};
use mcphost::tools::ToolDescriptor;

type CallHandler = dyn Fn(&str, &Value) -> Option<Value> + Send + Sync;

/// An in-process MCP server speaking through the [`Transport`] trait
///
/// `initialize` and `tools/list` are answered from the tool list;
/// `tools/call` goes to the handler, and a `None` answer leaves the call
/// pending forever.
pub struct ScriptedTransport {
    tools: Vec<Value>,
    on_call: Arc<CallHandler>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    pub fn new<F>(tools: Vec<Value>, on_call: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            tools,
            on_call: Arc::new(on_call),
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
            closed: CancellationToken::new(),
        }
    }

    /// A token that ends the inbound stream when cancelled (peer hang-up)
    pub fn hangup_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn answer(&self, request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let result = match request["method"].as_str().unwrap_or_default() {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "scripted", "version": "1.0.0" }
            }),
            "tools/list" => json!({ "tools": self.tools }),
            "tools/call" => {
                let name = request["params"]["name"].as_str().unwrap_or_default();
                let args = request["params"]
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Null);
                (self.on_call)(name, &args)?
            }
            other => {
                return Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": format!("Method not found: {}", other) }
                }))
            }
        };
        Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(McpHostError::Transport("scripted transport is closed".to_string()).into());
        }
        let request: Value = serde_json::from_str(&message)?;
        if let Some(reply) = self.answer(&request) {
            let _ = self.inbound_tx.send(reply.to_string());
        }
        Ok(())
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
                Some((item?, (rx, closed)))
            },
        ))
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }

    fn failure(&self) -> Option<String> {
        None
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}

/// Session options with short timeouts for tests
pub fn quick_options() -> SessionOptions {
    SessionOptions {
        handshake_timeout: Duration::from_secs(2),
        tool_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

/// Establish a session over a [`ScriptedTransport`]
pub async fn scripted_session<F>(id: &str, tools: Vec<Value>, on_call: F) -> Arc<ServerSession>
where
    F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
{
    ServerSession::establish(id, Arc::new(ScriptedTransport::new(tools, on_call)), quick_options())
        .await
}

/// The `get_weather(location)` tool as a server lists it
pub fn weather_tool() -> Value {
    json!({
        "name": "get_weather",
        "description": "Get the current weather for a location",
        "inputSchema": {
            "type": "object",
            "properties": { "location": { "type": "string" } },
            "required": ["location"]
        }
    })
}

/// A tool accepting any object
pub fn simple_tool(name: &str) -> Value {
    json!({ "name": name, "description": format!("The {} tool", name), "inputSchema": { "type": "object" } })
}

/// A `tools/call` result with one text item
pub fn text_result(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

/// Model adapter that replays a script of responses
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<Response>>>,
    repeat: Option<Response>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedAdapter {
    pub fn new(script: Vec<Result<Response>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: Response) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Conversations passed to `complete`, oldest first
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDescriptor],
        _params: &CompletionParams,
    ) -> Result<Response> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.repeat {
            Some(response) => Ok(response.clone()),
            None => Err(McpHostError::AdapterProtocol("script exhausted".to_string()).into()),
        }
    }
}

/// Write `contents` to `name` inside a fresh temporary directory
pub fn temp_config_file(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join(name);
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
