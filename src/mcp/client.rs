//! Async JSON-RPC 2.0 client over an MCP transport
//!
//! [`JsonRpcClient`] correlates requests with responses over any
//! [`Transport`]. Outbound messages go straight to [`Transport::send`], so a
//! delivery failure is reported to the caller of that request. Inbound
//! messages are processed by [`start_read_loop`], which classifies each one
//! as a response, a server-initiated request, or a notification.
//!
//! # Design
//!
//! - In-flight requests live in a `pending` map keyed by `u64` request id.
//!   Each entry is a `oneshot::Sender` resolved by the read loop.
//! - A request that times out, or whose future is dropped, removes its own
//!   slot. A timed-out request also sends `notifications/cancelled`.
//! - When the read loop exits, every pending sender is dropped and the
//!   client refuses new requests, so no caller waits forever.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{McpHostError, Result};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ERROR_INTERNAL, ERROR_METHOD_NOT_FOUND,
    METHOD_PING, NOTIF_CANCELLED,
};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Convenience alias for a boxed, `Send`-safe async future.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync + 'static>;

type ServerRequestHandler =
    Box<dyn Fn(serde_json::Value) -> BoxFuture<'static, serde_json::Value> + Send + Sync + 'static>;

type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// JSON-RPC 2.0 client bound to one server's transport.
///
/// Create one with [`JsonRpcClient::new`], wrap it in an `Arc`, and call
/// [`start_read_loop`]. Issue requests with [`JsonRpcClient::request`] and
/// notifications with [`JsonRpcClient::notify`].
///
/// Server `ping` requests are answered with an empty result. Any other
/// server-initiated request without a registered handler gets
/// `-32601 Method not found`.
pub struct JsonRpcClient {
    server: String,
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    server_request_handlers: RwLock<HashMap<String, ServerRequestHandler>>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("server", &self.server)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Removes a pending slot when the owning request finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl JsonRpcClient {
    /// Create a client for `server` over `transport`.
    ///
    /// # Arguments
    ///
    /// * `server` - Server identifier, used in errors and logs.
    /// * `transport` - The channel to the server.
    pub fn new(server: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let client = Self {
            server: server.into(),
            transport,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            notification_handlers: RwLock::new(HashMap::new()),
            server_request_handlers: RwLock::new(HashMap::new()),
        };
        client.on_server_request(METHOD_PING, |_params| {
            Box::pin(async { serde_json::json!({}) })
        });
        client
    }

    /// Identifier of the server this client talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The transport this client sends on.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Whether the read loop has exited.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// # Arguments
    ///
    /// * `method` - The JSON-RPC method name.
    /// * `params` - Parameters to serialize into the `params` field.
    /// * `timeout` - Optional timeout; defaults to [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// - [`McpHostError::Transport`] if the message cannot be sent or the
    ///   connection closes before a response arrives.
    /// - [`McpHostError::RequestTimeout`] if no response arrives in time.
    /// - [`McpHostError::Rpc`] if the server returns an error response.
    /// - [`McpHostError::Serialization`] if (de)serialization fails.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so the response cannot outrun the slot.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if self.is_closed() {
                return Err(McpHostError::Transport(format!(
                    "connection to `{}` is closed",
                    self.server
                ))
                .into());
            }
            pending.insert(id, tx);
        }
        let guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
        })?;

        self.transport.send(message).await?;

        let deadline = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                drop(guard);
                self.send_cancelled(id, "request timed out").await;
                return Err(McpHostError::RequestTimeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    timeout: deadline,
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            McpHostError::Transport(format!(
                "connection to `{}` closed before `{}` completed",
                self.server, method
            ))
        })?;

        let value = rpc_result.map_err(|e| McpHostError::Rpc {
            code: e.code,
            message: e.message,
        })?;

        serde_json::from_value(value).map_err(|e| McpHostError::Serialization(e).into())
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Transport`] if the message cannot be sent.
    pub async fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params)?
        }))?;

        self.transport.send(message).await
    }

    async fn send_cancelled(&self, id: u64, reason: &str) {
        let params = serde_json::json!({ "requestId": id, "reason": reason });
        if let Err(e) = self.notify(NOTIF_CANCELLED, params).await {
            tracing::debug!(
                "Could not send cancellation for request {} to `{}`: {}",
                id,
                self.server,
                e
            );
        }
    }

    /// Register a handler for a server-sent notification.
    ///
    /// The handler receives the raw `params` value (`Null` when absent).
    /// Registering a second handler for the same method replaces the first.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        if let Ok(mut handlers) = self.notification_handlers.write() {
            handlers.insert(method.into(), Box::new(f));
        }
    }

    /// Register a handler for a server-initiated request.
    ///
    /// The handler's return value is sent back as the `result` field of the
    /// JSON-RPC response.
    pub fn on_server_request(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) -> BoxFuture<'static, serde_json::Value> + Send + Sync + 'static,
    ) {
        if let Ok(mut handlers) = self.server_request_handlers.write() {
            handlers.insert(method.into(), Box::new(f));
        }
    }

    fn shutdown(&self) {
        let mut pending = lock(&self.pending);
        self.closed.store(true, Ordering::SeqCst);
        pending.clear();
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// The loop reads the transport's inbound stream and dispatches each
/// message. It exits when the stream ends or `cancellation` fires. On exit
/// every pending request fails with a transport error and the client stops
/// accepting new requests.
pub fn start_read_loop(
    client: Arc<JsonRpcClient>,
    cancellation: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let transport = Arc::clone(&client.transport);
        let mut inbound = transport.receive();

        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                maybe_msg = inbound.next() => {
                    let Some(raw) = maybe_msg else {
                        tracing::debug!("Inbound stream from `{}` ended", client.server);
                        break;
                    };
                    dispatch_message(&raw, &client).await;
                }
            }
        }

        client.shutdown();
    })
}

/// Classify and dispatch a single inbound JSON string.
async fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                "Discarding malformed message from `{}`: {}",
                client.server,
                e
            );
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client);
    } else if has_id && has_method {
        handle_server_request(value, client).await;
    } else if has_method {
        handle_notification(value, client);
    } else {
        tracing::debug!(
            "Ignoring unclassifiable message from `{}`: has_id={has_id} has_result={has_result} has_error={has_error}",
            client.server
        );
    }
}

fn handle_response(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id = match id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse::<u64>().ok()))
    {
        Some(id) => id,
        None => {
            tracing::warn!("Response from `{}` has non-integer id: {id_val}", client.server);
            return;
        }
    };

    let Some(tx) = lock(&client.pending).remove(&id) else {
        tracing::debug!(
            "Ignoring response for unknown id {} from `{}`",
            id,
            client.server
        );
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(serde_json::from_value::<JsonRpcError>(error_val.clone())
            .unwrap_or_else(|_| JsonRpcError {
                code: ERROR_INTERNAL,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        None => Ok(value
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    // The caller may already have given up.
    let _ = tx.send(outcome);
}

async fn handle_server_request(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let params = value
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let handler_future = client
        .server_request_handlers
        .read()
        .ok()
        .and_then(|handlers| handlers.get(method).map(|h| h(params)));

    let response = match handler_future {
        Some(future) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(future.await),
            error: None,
        },
        None => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code: ERROR_METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        },
    };

    match serde_json::to_string(&response) {
        Ok(serialized) => {
            if let Err(e) = client.transport.send(serialized).await {
                tracing::debug!("Could not answer `{}` from `{}`: {}", method, client.server, e);
            }
        }
        Err(e) => tracing::warn!("Could not serialize response to `{}`: {}", method, e),
    }
}

fn handle_notification(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let params = value
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let Ok(handlers) = client.notification_handlers.read() else {
        return;
    };
    match handlers.get(method) {
        Some(handler) => handler(params),
        None => tracing::debug!(
            "No handler for notification `{}` from `{}`",
            method,
            client.server
        ),
    }
}
