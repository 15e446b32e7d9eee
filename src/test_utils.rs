//! Test utilities for mcphost
//!
//! This module provides common test utilities: temporary files, a scripted
//! model adapter, and an in-process MCP server wired to a fake transport.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::error::{McpHostError, Result};
use crate::mcp::transport::fake::{FakeRemote, FakeTransport};
use crate::mcp::types::{ERROR_METHOD_NOT_FOUND, REQUESTED_PROTOCOL_VERSION};
use crate::providers::{CompletionParams, Message, ModelAdapter, Response};
use crate::tools::ToolDescriptor;

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given content
///
/// # Panics
///
/// Panics if file creation or writing fails
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: Result<T>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = e.to_string();
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// A `get_weather` tool definition as a server would list it
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

/// A tool definition that accepts any object
pub fn simple_tool(name: &str) -> Value {
    json!({
        "name": name,
        "description": format!("The {} tool", name),
        "inputSchema": { "type": "object" }
    })
}

/// Start a scripted MCP server behind a [`FakeTransport`]
///
/// The server answers `initialize` and `tools/list` from `tools`, and
/// routes `tools/call` to `on_call(name, arguments)`. Returning `None`
/// from `on_call` leaves the request unanswered. Unknown methods get a
/// method-not-found error; notifications are ignored.
///
/// The returned [`FakeRemote`] can push notifications or drop the
/// connection.
pub fn spawn_fake_server<F>(tools: Vec<Value>, on_call: F) -> (FakeTransport, FakeRemote)
where
    F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
{
    spawn_dynamic_server(Arc::new(Mutex::new(tools)), on_call)
}

/// Like [`spawn_fake_server`], but `tools/list` reads the shared list at
/// request time so a test can change it and announce the change.
pub fn spawn_dynamic_server<F>(
    tools: Arc<Mutex<Vec<Value>>>,
    on_call: F,
) -> (FakeTransport, FakeRemote)
where
    F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
{
    let (transport, mut handle) = FakeTransport::new();
    let remote = handle.remote();
    let replies = handle.remote();

    tokio::spawn(async move {
        while let Some(raw) = handle.outbound_rx.recv().await {
            let Ok(request) = serde_json::from_str::<Value>(&raw) else {
                continue;
            };
            let Some(id) = request.get("id").cloned() else {
                continue;
            };
            let method = request["method"].as_str().unwrap_or_default();
            let reply = match method {
                "initialize" => Some(json!({
                    "protocolVersion": REQUESTED_PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "fake-server", "version": "0.1.0" }
                })),
                "tools/list" => {
                    let listed = tools.lock().unwrap().clone();
                    Some(json!({ "tools": listed }))
                }
                "tools/call" => {
                    let name = request["params"]["name"].as_str().unwrap_or_default();
                    let args = request["params"]
                        .get("arguments")
                        .cloned()
                        .unwrap_or(Value::Null);
                    match on_call(name, &args) {
                        Some(result) => Some(result),
                        None => continue,
                    }
                }
                _ => None,
            };
            let message = match reply {
                Some(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                None => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": ERROR_METHOD_NOT_FOUND, "message": "Method not found" }
                }),
            };
            replies.push(message);
        }
    });

    (transport, remote)
}

/// Model adapter that replays a fixed script of responses
///
/// Every call records the conversation it was given. When the script runs
/// out, the adapter answers with an `AdapterProtocol` error unless it was
/// built with [`ScriptedAdapter::repeating`].
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<Response>>>,
    repeat: Option<Response>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedAdapter {
    /// Replay `script` in order
    pub fn new(script: Vec<Result<Response>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `response`
    pub fn repeating(response: Response) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Conversations passed to each `complete` call, oldest first
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
