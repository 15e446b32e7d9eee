//! One live connection to a configured MCP server
//!
//! A [`ServerSession`] owns its transport, drives the MCP handshake and
//! tracks its lifecycle:
//!
//! ```text
//! connecting --handshake ok--------------> ready
//! connecting --timeout / bad response----> failed
//! ready      --close() / peer hung up----> closed
//! ready      --transport error-----------> failed
//! ```
//!
//! `closed` and `failed` are terminal. The current state is published on a
//! `tokio::sync::watch` channel so the host can react to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::{McpServerConfig, OrchestrationConfig, ReconnectConfig};
use crate::error::{McpHostError, Result};
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol};
use crate::mcp::transport::sse::SseTransport;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::{Transport, TransportKind};
use crate::mcp::types::{
    CallToolResponse, ClientCapabilities, Implementation, McpTool, ERROR_METHOD_NOT_FOUND,
    NOTIF_TOOLS_LIST_CHANGED,
};
use crate::retry::Backoff;

/// Lifecycle state of a [`ServerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Transport open, handshake in progress
    Connecting,
    /// Handshake complete; tools may be called
    Ready,
    /// Shut down deliberately or by the peer
    Closed,
    /// Handshake or transport failed
    Failed,
}

impl SessionState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Timeouts and reconnect policy applied to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Bound on the whole handshake, including the first tool listing
    pub handshake_timeout: Duration,
    /// Default timeout for `tools/call`
    pub tool_timeout: Duration,
    /// Event-stream reconnect policy (sse only)
    pub reconnect: ReconnectConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&OrchestrationConfig::default())
    }
}

impl From<&OrchestrationConfig> for SessionOptions {
    fn from(config: &OrchestrationConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            tool_timeout: config.tool_timeout(),
            reconnect: config.reconnect.clone(),
        }
    }
}

/// A handshaken (or failed) connection to one MCP server.
pub struct ServerSession {
    id: String,
    kind: TransportKind,
    transport: Arc<dyn Transport>,
    client: Arc<JsonRpcClient>,
    protocol: RwLock<Option<Arc<InitializedMcpProtocol>>>,
    tools: RwLock<Vec<McpTool>>,
    tools_stale: AtomicBool,
    tools_changed: Arc<Notify>,
    state: watch::Sender<SessionState>,
    last_error: Mutex<Option<String>>,
    options: SessionOptions,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServerSession {
    /// Open the configured transport and perform the handshake.
    ///
    /// A server that answers badly or too slowly still yields a session,
    /// in state [`SessionState::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Configuration`] for an invalid entry and
    /// [`McpHostError::Transport`] when the transport cannot be created
    /// (process spawn failure, unreachable event stream).
    pub async fn connect(
        id: &str,
        config: &McpServerConfig,
        options: &SessionOptions,
    ) -> Result<Arc<Self>> {
        config.validate(id)?;

        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Stdio => {
                let command = config.command.as_deref().ok_or_else(|| {
                    McpHostError::Configuration(format!("server `{}` has no command", id))
                })?;
                Arc::new(StdioTransport::spawn(
                    command,
                    &config.args,
                    &config.env,
                    config.cwd.clone(),
                )?)
            }
            TransportKind::Sse => Arc::new(
                SseTransport::connect(
                    config.sse_url(id)?,
                    config.headers.clone(),
                    Backoff::from(&options.reconnect),
                    options.handshake_timeout,
                )
                .await?,
            ),
        };

        let mut options = options.clone();
        if let Some(secs) = config.timeout_seconds {
            options.tool_timeout = Duration::from_secs(secs);
        }

        Ok(Self::establish(id, transport, options).await)
    }

    /// Handshake over an already-open transport.
    ///
    /// The returned session is either `ready` or `failed`; see
    /// [`ServerSession::last_error`] for the reason of a failure.
    pub async fn establish(
        id: &str,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let client = Arc::new(JsonRpcClient::new(id, Arc::clone(&transport)));
        let tools_changed = Arc::new(Notify::new());
        let (state, _) = watch::channel(SessionState::Connecting);

        let session = Arc::new(Self {
            id: id.to_string(),
            kind: transport.kind(),
            transport: Arc::clone(&transport),
            client: Arc::clone(&client),
            protocol: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            tools_stale: AtomicBool::new(false),
            tools_changed,
            state,
            last_error: Mutex::new(None),
            options,
            cancel: cancel.clone(),
        });

        let weak = Arc::downgrade(&session);
        client.on_notification(NOTIF_TOOLS_LIST_CHANGED, move |_params| {
            if let Some(session) = weak.upgrade() {
                tracing::debug!("Server `{}` reports its tool list changed", session.id);
                session.tools_stale.store(true, Ordering::SeqCst);
                session.tools_changed.notify_one();
            }
        });

        let read_loop = start_read_loop(Arc::clone(&client), cancel.clone());
        tokio::spawn(watch_read_loop(read_loop, Arc::downgrade(&session)));
        tokio::spawn(drain_diagnostics(
            id.to_string(),
            Arc::clone(&transport),
            cancel.clone(),
        ));

        match tokio::time::timeout(session.options.handshake_timeout, session.handshake()).await {
            Ok(Ok(count)) => {
                tracing::info!("Connected to MCP server `{}` ({} tools)", id, count);
                session.set_state(SessionState::Ready);
            }
            Ok(Err(e)) => {
                session.fail(format!("handshake failed: {}", e)).await;
            }
            Err(_) => {
                let timeout = session.options.handshake_timeout;
                session
                    .fail(format!("handshake timed out after {:?}", timeout))
                    .await;
            }
        }

        session
    }

    async fn handshake(&self) -> Result<usize> {
        let initialized = McpProtocol::new(Arc::clone(&self.client))
            .initialize(
                Implementation::host(),
                ClientCapabilities::default(),
                Some(self.options.handshake_timeout),
            )
            .await?;

        let tools = match initialized
            .list_tools(Some(self.options.handshake_timeout))
            .await
        {
            Ok(tools) => tools,
            Err(e) if !initialized.has_tools() && is_method_not_found(&e) => Vec::new(),
            Err(e) => return Err(e),
        };

        let count = tools.len();
        self.store_tools(tools);
        if let Ok(mut slot) = self.protocol.write() {
            *slot = Some(Arc::new(initialized));
        }
        Ok(count)
    }

    /// Server identifier from the configuration.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transport this session runs over.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Why the session failed, if it did.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Tools cached from the handshake or the last refresh.
    pub fn list_tools(&self) -> Vec<McpTool> {
        self.tools.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// Whether the server announced a tool-list change since the last fetch.
    pub fn tools_stale(&self) -> bool {
        self.tools_stale.load(Ordering::SeqCst)
    }

    /// Wait until the server announces a tool-list change.
    pub async fn tools_changed(&self) {
        self.tools_changed.notified().await;
    }

    /// Fetch the tool list again and replace the cache.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::SessionUnavailable`] unless the session is
    /// ready, or the request error.
    pub async fn refresh_tools(&self) -> Result<Vec<McpTool>> {
        let protocol = self.ready_protocol()?;
        self.tools_stale.store(false, Ordering::SeqCst);
        let tools = protocol
            .list_tools(Some(self.options.handshake_timeout))
            .await?;
        self.store_tools(tools.clone());
        Ok(tools)
    }

    /// Invoke `name` on the server.
    ///
    /// `timeout` defaults to the session's tool timeout. A transport error
    /// is retried once; a timeout is not.
    ///
    /// # Errors
    ///
    /// - [`McpHostError::SessionUnavailable`] if the session is not ready.
    /// - [`McpHostError::ToolTimeout`] if the server does not answer in time.
    /// - [`McpHostError::Transport`] if the retry fails as well.
    /// - [`McpHostError::Rpc`] if the server rejects the request.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResponse> {
        let timeout = timeout.unwrap_or(self.options.tool_timeout);
        let protocol = self.ready_protocol()?;

        match self.call_once(&protocol, name, arguments.clone(), timeout).await {
            Err(e) if is_transport_error(&e) => {
                tracing::warn!(
                    "Call to `{}` on `{}` hit a transport error, retrying once: {}",
                    name,
                    self.id,
                    e
                );
                let protocol = self.ready_protocol()?;
                self.call_once(&protocol, name, arguments, timeout).await
            }
            other => other,
        }
    }

    async fn call_once(
        &self,
        protocol: &InitializedMcpProtocol,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<CallToolResponse> {
        protocol
            .call_tool(name, arguments, Some(timeout))
            .await
            .map_err(|e| match e.downcast_ref::<McpHostError>() {
                Some(McpHostError::RequestTimeout { .. }) => McpHostError::ToolTimeout {
                    tool: name.to_string(),
                    timeout,
                }
                .into(),
                _ => e,
            })
    }

    /// Shut the session down and release the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error, after the state has already
    /// moved to `closed`.
    pub async fn close(&self) -> Result<()> {
        self.set_state(SessionState::Closed);
        self.cancel.cancel();
        self.transport.close().await
    }

    fn ready_protocol(&self) -> Result<Arc<InitializedMcpProtocol>> {
        let state = self.state();
        let protocol = self.protocol.read().ok().and_then(|p| p.clone());
        match protocol {
            Some(protocol) if state == SessionState::Ready && !self.client.is_closed() => {
                Ok(protocol)
            }
            _ => Err(McpHostError::SessionUnavailable {
                server: self.id.clone(),
                state: state.to_string(),
            }
            .into()),
        }
    }

    fn store_tools(&self, tools: Vec<McpTool>) {
        if let Ok(mut slot) = self.tools.write() {
            *slot = tools;
        }
    }

    /// Move to `next` unless the session already reached a terminal state.
    fn set_state(&self, next: SessionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::debug!("Session `{}` is now {}", self.id, next);
        }
        changed
    }

    async fn fail(&self, reason: String) {
        tracing::warn!("MCP server `{}` failed: {}", self.id, reason);
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(reason);
        }
        if self.set_state(SessionState::Failed) {
            self.cancel.cancel();
            if let Err(e) = self.transport.close().await {
                tracing::debug!("Closing transport of `{}` failed: {}", self.id, e);
            }
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Map the end of the read loop onto a terminal state.
async fn watch_read_loop(read_loop: tokio::task::JoinHandle<()>, session: Weak<ServerSession>) {
    let _ = read_loop.await;
    let Some(session) = session.upgrade() else {
        return;
    };
    if session.state().is_terminal() {
        return;
    }
    match session.transport.failure() {
        Some(reason) => session.fail(format!("transport error: {}", reason)).await,
        None => {
            tracing::info!("MCP server `{}` disconnected", session.id);
            session.set_state(SessionState::Closed);
        }
    }
}

async fn drain_diagnostics(id: String, transport: Arc<dyn Transport>, cancel: CancellationToken) {
    let mut lines = transport.receive_err();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next() => match line {
                Some(line) => tracing::debug!(target: "mcphost::mcp::transport::stdio", "[{}] {}", id, line),
                None => break,
            },
        }
    }
}

fn is_transport_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<McpHostError>()
        .is_some_and(McpHostError::is_retryable)
}

fn is_method_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::Rpc { code, .. }) if *code == ERROR_METHOD_NOT_FOUND
    )
}
