//! Host context
//!
//! [`HostContext`] owns everything that lives for the whole process: the
//! model adapter, one [`ServerSession`] per configured server, and the
//! shared [`ToolCatalog`]. It is built once at startup, hands out
//! [`Orchestrator`]s, and closes every session on [`HostContext::shutdown`].
//!
//! Each session gets a lifecycle watcher task. When the session reaches a
//! terminal state its tools leave the catalog; when the server announces a
//! tool-list change the session is listed again and re-registered.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{ConversationStore, Orchestrator, OrchestratorSettings};
use crate::config::Config;
use crate::error::Result;
use crate::mcp::transport::TransportKind;
use crate::mcp::{ServerSession, SessionOptions, SessionState};
use crate::providers::{create_provider, CompletionParams, ModelAdapter};
use crate::tools::{ToolCatalog, ToolDescriptor};

/// Point-in-time view of one configured server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    /// Server identifier from the configuration
    pub id: String,
    /// Transport the server is reached over
    pub kind: TransportKind,
    /// Lifecycle state
    pub state: SessionState,
    /// Tools this server currently contributes to the catalog
    pub tool_count: usize,
    /// Why the server is unavailable, if it is
    pub error: Option<String>,
}

/// Process-wide state: adapter, sessions and the tool catalog
pub struct HostContext {
    config: Config,
    adapter: Arc<dyn ModelAdapter>,
    catalog: Arc<ToolCatalog>,
    sessions: Vec<Arc<ServerSession>>,
    unreachable: Vec<ServerStatus>,
    watchers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl HostContext {
    /// Validate `config`, build the provider and connect every server
    ///
    /// Servers are connected concurrently. A server that cannot be reached
    /// does not abort startup; it is reported by
    /// [`HostContext::list_servers`] as `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpHostError::Configuration`] if the
    /// configuration is invalid or names an unknown provider.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;
        let provider = create_provider(&config.llm_provider)?;
        info!(
            "Using {} model `{}`",
            config.llm_provider.provider_type, config.llm_provider.model
        );

        let options = SessionOptions::from(&config.orchestration);
        let attempts = join_all(config.mcp_servers.iter().map(|(id, server)| {
            let options = &options;
            async move {
                debug!("Connecting to MCP server `{}` over {}", id, server.transport);
                (
                    id.clone(),
                    server.transport,
                    ServerSession::connect(id, server, options).await,
                )
            }
        }))
        .await;

        let mut sessions = Vec::new();
        let mut unreachable = Vec::new();
        for (id, kind, attempt) in attempts {
            match attempt {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!("Could not start MCP server `{}`: {}", id, e);
                    unreachable.push(ServerStatus {
                        id,
                        kind,
                        state: SessionState::Failed,
                        tool_count: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let mut host = Self::with_parts(config, Arc::new(provider), sessions).await;
        host.unreachable = unreachable;
        Ok(host)
    }

    /// Assemble a host from an adapter and already-established sessions
    ///
    /// Ready sessions are registered in a fresh catalog and every session
    /// gets a lifecycle watcher.
    pub async fn with_parts(
        config: Config,
        adapter: Arc<dyn ModelAdapter>,
        mut sessions: Vec<Arc<ServerSession>>,
    ) -> Self {
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        let catalog = Arc::new(ToolCatalog::new());
        let cancel = CancellationToken::new();

        for session in &sessions {
            if session.state() != SessionState::Ready {
                warn!(
                    "MCP server `{}` is {}: {}",
                    session.id(),
                    session.state(),
                    session.last_error().unwrap_or_default()
                );
                continue;
            }
            match catalog.register(Arc::clone(session)).await {
                Ok(names) => info!(
                    "MCP server `{}` ready with {} tools",
                    session.id(),
                    names.len()
                ),
                Err(e) => warn!("Could not register `{}`: {}", session.id(), e),
            }
        }

        let watchers = sessions
            .iter()
            .map(|session| {
                tokio::spawn(watch_session(
                    Arc::clone(session),
                    Arc::clone(&catalog),
                    cancel.clone(),
                ))
            })
            .collect();

        Self {
            config,
            adapter,
            catalog,
            sessions,
            unreachable: Vec::new(),
            watchers,
            cancel,
        }
    }

    /// Tools currently offered to the model, in registration order
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.catalog.descriptors().await
    }

    /// Status of every configured server, ordered by id
    pub async fn list_servers(&self) -> Vec<ServerStatus> {
        let mut statuses = self.unreachable.clone();
        for session in &self.sessions {
            statuses.push(ServerStatus {
                id: session.id().to_string(),
                kind: session.kind(),
                state: session.state(),
                tool_count: self.catalog.tool_count(session.id()).await,
                error: session.last_error(),
            });
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Build an orchestrator over the shared catalog with a fresh conversation
    pub fn orchestrator(&self) -> Orchestrator {
        let window = self.config.message_window;
        let conversation = match &self.config.system_prompt {
            Some(prompt) => ConversationStore::with_system_prompt(window, prompt.clone()),
            None => ConversationStore::new(window),
        };
        Orchestrator::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.catalog),
            conversation,
            OrchestratorSettings::from(&self.config.orchestration),
            CompletionParams::from_map(self.config.llm_provider.parameters.clone()),
        )
    }

    /// The shared tool catalog
    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// The effective configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the watchers and close every session
    ///
    /// Bounded by the configured shutdown timeout; sessions still closing
    /// when it expires are abandoned.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        let timeout = self.config.orchestration.shutdown_timeout();

        let closing = join_all(self.sessions.iter().map(|session| async move {
            if let Err(e) = session.close().await {
                warn!("Error closing MCP server `{}`: {}", session.id(), e);
            }
        }));
        if tokio::time::timeout(timeout, closing).await.is_err() {
            warn!("Shutdown did not finish within {:?}", timeout);
        }

        for session in &self.sessions {
            self.catalog.unregister(session.id()).await;
        }
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
        info!("Closed {} MCP sessions", self.sessions.len());
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Follow one session until it ends or the host shuts down
async fn watch_session(
    session: Arc<ServerSession>,
    catalog: Arc<ToolCatalog>,
    cancel: CancellationToken,
) {
    let mut state = session.subscribe_state();
    if session.state().is_terminal() {
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            changed = state.changed() => {
                let current = *state.borrow();
                if changed.is_err() || current.is_terminal() {
                    let removed = catalog.unregister(session.id()).await;
                    info!(
                        "MCP server `{}` is {}; removed {} tools",
                        session.id(),
                        current,
                        removed
                    );
                    return;
                }
            }
            _ = session.tools_changed() => {
                debug!("MCP server `{}` changed its tool list", session.id());
                match session.refresh_tools().await {
                    Ok(_) => match catalog.register(Arc::clone(&session)).await {
                        Ok(names) => info!(
                            "Re-registered `{}` with {} tools",
                            session.id(),
                            names.len()
                        ),
                        Err(e) => warn!("Could not re-register `{}`: {}", session.id(), e),
                    },
                    Err(e) => warn!("Could not refresh tools of `{}`: {}", session.id(), e),
                }
            }
        }
    }
}
