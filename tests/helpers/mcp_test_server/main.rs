//! MCP test server binary for integration tests
//!
//! This binary implements a minimal MCP server that communicates over
//! stdin/stdout using newline-delimited JSON (the stdio transport protocol).
//! It is used exclusively by integration tests to exercise the stdio
//! transport and server sessions without a real external MCP server.
//!
//! # Handled Methods
//!
//! - `initialize` -- responds with protocol version `2024-11-05` and the
//!   `tools` capability.
//! - `notifications/*` -- swallowed silently.
//! - `tools/list` -- returns `get_weather`, `echo`, `slow`, `broken` and
//!   `exit`.
//! - `tools/call`:
//!   - `get_weather` answers with a canned forecast for `location`
//!   - `echo` returns the `message` argument
//!   - `slow` never answers
//!   - `broken` returns an `isError` result
//!   - `exit` terminates the process without answering
//! - `ping` -- empty result.
//! - All other methods -- returns a JSON-RPC `-32601 Method not found` error.
//!
//! Every request is also logged as one line on stderr.

use std::io::{self, BufRead, Write};

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&serde_json::Value::Null, -32700, "Parse error");
                let _ = writeln!(out, "{}", response);
                let _ = out.flush();
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        eprintln!("mcp_test_server: {}", method);

        if method.starts_with("notifications/") {
            continue;
        }

        let id = request
            .get("id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id),
            "tools/call" => match handle_tools_call(&id, &request) {
                Some(response) => response,
                None => continue,
            },
            "ping" => result(&id, serde_json::json!({})),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if writeln!(out, "{}", response).is_err() {
            break;
        }
        if out.flush().is_err() {
            break;
        }
    }
}

fn handle_initialize(id: &serde_json::Value) -> serde_json::Value {
    result(
        id,
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" }
        }),
    )
}

fn handle_tools_list(id: &serde_json::Value) -> serde_json::Value {
    result(
        id,
        serde_json::json!({
            "tools": [
                {
                    "name": "get_weather",
                    "description": "Get the current weather for a location",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "location": { "type": "string" } },
                        "required": ["location"]
                    }
                },
                {
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "message": { "type": "string" } }
                    }
                },
                {
                    "name": "slow",
                    "description": "Never answers",
                    "inputSchema": { "type": "object" }
                },
                {
                    "name": "broken",
                    "description": "Always reports a tool error",
                    "inputSchema": { "type": "object" }
                },
                {
                    "name": "exit",
                    "description": "Terminates the server",
                    "inputSchema": { "type": "object" }
                }
            ]
        }),
    )
}

/// Answer a `tools/call`; `None` means the call gets no response.
fn handle_tools_call(
    id: &serde_json::Value,
    request: &serde_json::Value,
) -> Option<serde_json::Value> {
    let params = request.get("params").unwrap_or(&serde_json::Value::Null);
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arg = |key: &str| {
        params
            .get("arguments")
            .and_then(|a| a.get(key))
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string()
    };

    match tool_name {
        "get_weather" => Some(text_result(
            id,
            &format!("{{\"location\": \"{}\", \"temp\": 18, \"unit\": \"C\"}}", arg("location")),
            false,
        )),
        "echo" => Some(text_result(id, &arg("message"), false)),
        "slow" => None,
        "broken" => Some(text_result(id, "the tool broke", true)),
        "exit" => std::process::exit(0),
        other => Some(make_error(id, -32602, &format!("Unknown tool: {}", other))),
    }
}

fn text_result(id: &serde_json::Value, text: &str, is_error: bool) -> serde_json::Value {
    result(
        id,
        serde_json::json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error
        }),
    )
}

fn result(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn make_error(id: &serde_json::Value, code: i32, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
