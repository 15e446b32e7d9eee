//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! This module provides two types that represent the two phases of an MCP
//! client session:
//!
//! - [`McpProtocol`] -- an uninitialized client. Call
//!   [`McpProtocol::initialize`] to perform the `initialize` /
//!   `notifications/initialized` handshake and receive an
//!   [`InitializedMcpProtocol`].
//! - [`InitializedMcpProtocol`] -- a negotiated session offering
//!   `tools/list` (pagination handled internally) and `tools/call`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{McpHostError, Result};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, ListToolsResponse, McpTool, PaginatedParams, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, REQUESTED_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Upper bound on `tools/list` pages followed in one listing.
const MAX_TOOL_PAGES: usize = 100;

/// An MCP client session that has not completed the handshake.
#[derive(Debug)]
pub struct McpProtocol {
    client: Arc<JsonRpcClient>,
}

impl McpProtocol {
    /// Wrap a client whose read loop is already running.
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    ///
    /// Requests protocol revision [`REQUESTED_PROTOCOL_VERSION`] and accepts
    /// any server answer listed in [`SUPPORTED_PROTOCOL_VERSIONS`].
    ///
    /// # Errors
    ///
    /// - [`McpHostError::ProtocolVersion`] if the server selects a version
    ///   this host does not speak.
    /// - Any error from [`JsonRpcClient::request`] or
    ///   [`JsonRpcClient::notify`].
    pub async fn initialize(
        self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
        timeout: Option<Duration>,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: REQUESTED_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                },
                timeout,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(McpHostError::ProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))
            .await?;

        tracing::debug!(
            "Server `{}` is {} {} (protocol {})",
            self.client.server(),
            response.server_info.name,
            response.server_info.version,
            response.protocol_version
        );

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

/// A fully negotiated MCP client session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    /// The underlying JSON-RPC client.
    pub client: Arc<JsonRpcClient>,
    /// The server's response to the `initialize` request.
    pub initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// Whether the server advertised the `tools` capability.
    pub fn has_tools(&self) -> bool {
        self.initialize_response.capabilities.tools.is_some()
    }

    /// List all tools advertised by the server, following pagination.
    ///
    /// Each page request gets the full `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if any paged request fails.
    pub async fn list_tools(&self, timeout: Option<Duration>) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let resp: ListToolsResponse = self
                .client
                .request(METHOD_TOOLS_LIST, PaginatedParams { cursor }, timeout)
                .await?;

            tools.extend(resp.tools);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            "Server `{}` returned more than {} tool pages; truncating",
            self.client.server(),
            MAX_TOOL_PAGES
        );
        Ok(tools)
    }

    /// Invoke a named tool on the server.
    ///
    /// # Arguments
    ///
    /// * `name` - The tool name as returned by `tools/list`.
    /// * `arguments` - JSON arguments matching the tool's `inputSchema`.
    /// * `timeout` - Request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns a
    /// JSON-RPC error. A tool-level failure (`isError: true`) is a
    /// successful response.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResponse> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                timeout,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::start_read_loop;
    use crate::mcp::transport::fake::{FakeTransport, FakeTransportHandle};
    use tokio_util::sync::CancellationToken;

    fn wired_protocol() -> (McpProtocol, FakeTransportHandle, CancellationToken) {
        let (transport, handle) = FakeTransport::new();
        let token = CancellationToken::new();
        let client = Arc::new(JsonRpcClient::new("mock", Arc::new(transport)));
        start_read_loop(Arc::clone(&client), token.clone());
        (McpProtocol::new(client), handle, token)
    }

    async fn recv_json(handle: &mut FakeTransportHandle) -> serde_json::Value {
        let raw = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .expect("timed out")
            .expect("closed");
        serde_json::from_str(&raw).unwrap()
    }

    fn reply(handle: &FakeTransportHandle, id: &serde_json::Value, result: serde_json::Value) {
        let resp = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result });
        handle.inbound_tx.send(resp.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_initialize_rejects_unsupported_protocol_version() {
        let (proto, mut handle, ct) = wired_protocol();

        let server = tokio::spawn(async move {
            let req = recv_json(&mut handle).await;
            reply(
                &handle,
                &req["id"],
                serde_json::json!({
                    "protocolVersion": "1999-01-01",
                    "capabilities": {},
                    "serverInfo": { "name": "old-server", "version": "0.0.1" }
                }),
            );
            handle
        });

        let err = proto
            .initialize(
                Implementation::host(),
                ClientCapabilities::default(),
                Some(Duration::from_secs(2)),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<McpHostError>(),
            Some(McpHostError::ProtocolVersion { got, .. }) if got == "1999-01-01"
        ));
        server.await.unwrap();
        ct.cancel();
    }

    #[tokio::test]
    async fn test_initialize_sends_requested_version_then_initialized() {
        let (proto, mut handle, ct) = wired_protocol();

        let server = tokio::spawn(async move {
            let req = recv_json(&mut handle).await;
            assert_eq!(req["method"], "initialize");
            assert_eq!(req["params"]["protocolVersion"], REQUESTED_PROTOCOL_VERSION);
            reply(
                &handle,
                &req["id"],
                serde_json::json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "test-server", "version": "1.0.0" }
                }),
            );
            let initialized = recv_json(&mut handle).await;
            assert_eq!(initialized["method"], METHOD_INITIALIZED);
            assert!(initialized.get("id").is_none());
            handle
        });

        let session = proto
            .initialize(
                Implementation::host(),
                ClientCapabilities::default(),
                Some(Duration::from_secs(2)),
            )
            .await
            .unwrap();

        assert_eq!(session.initialize_response.protocol_version, "2025-03-26");
        assert!(session.has_tools());
        server.await.unwrap();
        ct.cancel();
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor_pagination() {
        let (proto, mut handle, ct) = wired_protocol();
        let session = InitializedMcpProtocol {
            client: proto.client,
            initialize_response: serde_json::from_value(serde_json::json!({
                "protocolVersion": REQUESTED_PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": { "name": "mock", "version": "1.0" }
            }))
            .unwrap(),
        };

        let server = tokio::spawn(async move {
            let first = recv_json(&mut handle).await;
            assert!(first["params"].get("cursor").is_none());
            reply(
                &handle,
                &first["id"],
                serde_json::json!({
                    "tools": [{ "name": "tool_a", "inputSchema": {} }],
                    "nextCursor": "page2"
                }),
            );

            let second = recv_json(&mut handle).await;
            assert_eq!(second["params"]["cursor"], "page2");
            reply(
                &handle,
                &second["id"],
                serde_json::json!({ "tools": [{ "name": "tool_b", "inputSchema": {} }] }),
            );
            handle
        });

        let tools = session.list_tools(Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "tool_a");
        assert_eq!(tools[1].name, "tool_b");
        server.await.unwrap();
        ct.cancel();
    }
}
