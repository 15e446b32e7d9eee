//! Merged tool namespace over all ready server sessions
//!
//! The catalog maps catalog-unique tool names to descriptors and routes a
//! call to the owning [`ServerSession`]. Mutation (`register`,
//! `unregister`) takes the write lock; lookups and dispatch take the read
//! lock only long enough to find the owner, so a session may be removed
//! while calls to other sessions are in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{McpHostError, Result};
use crate::mcp::session::{ServerSession, SessionState};
use crate::mcp::types::CallToolResponse;
use crate::tools::ToolDescriptor;

#[derive(Default)]
struct CatalogState {
    /// Descriptors in registration order
    entries: Vec<ToolDescriptor>,
    sessions: HashMap<String, Arc<ServerSession>>,
}

impl CatalogState {
    fn is_taken(&self, name: &str) -> bool {
        self.entries.iter().any(|d| d.name == name)
    }

    /// Pick a free catalog name for `tool` owned by `server_id`.
    fn disambiguate(&self, server_id: &str, tool: &str) -> String {
        if !self.is_taken(tool) {
            return tool.to_string();
        }
        let prefixed = format!("{}__{}", server_id, tool);
        if !self.is_taken(&prefixed) {
            return prefixed;
        }
        (2..)
            .map(|n| format!("{}_{}", prefixed, n))
            .find(|candidate| !self.is_taken(candidate))
            .unwrap_or(prefixed)
    }

    fn remove_session(&mut self, session_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|d| d.owner_session_id != session_id);
        self.sessions.remove(session_id);
        before - self.entries.len()
    }
}

/// Tool catalog shared by the orchestration loop and session watchers
#[derive(Default)]
pub struct ToolCatalog {
    state: RwLock<CatalogState>,
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog").finish_non_exhaustive()
    }
}

impl ToolCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every cached tool of `session` to the catalog
    ///
    /// Descriptors previously registered for the same session are replaced.
    /// A name already owned by another session is disambiguated as
    /// `<serverId>__<tool>`, with `_2`, `_3`, ... appended if that is taken
    /// too, so the result depends only on registration order.
    ///
    /// # Arguments
    ///
    /// * `session` - A session in the `ready` state
    ///
    /// # Returns
    ///
    /// Returns the catalog names assigned to the session's tools
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::SessionUnavailable`] if the session is not
    /// ready.
    pub async fn register(&self, session: Arc<ServerSession>) -> Result<Vec<String>> {
        let state = session.state();
        if state != SessionState::Ready {
            return Err(McpHostError::SessionUnavailable {
                server: session.id().to_string(),
                state: state.to_string(),
            }
            .into());
        }

        let server_id = session.id().to_string();
        let tools = session.list_tools();

        let mut catalog = self.state.write().await;
        catalog.remove_session(&server_id);

        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(tools.len());
        for tool in tools {
            if !seen.insert(tool.name.clone()) {
                tracing::warn!(
                    "Server `{}` lists tool `{}` more than once; keeping the first",
                    server_id,
                    tool.name
                );
                continue;
            }

            let name = catalog.disambiguate(&server_id, &tool.name);
            if name != tool.name {
                tracing::info!(
                    "Tool `{}` from `{}` collides with an existing tool; registered as `{}`",
                    tool.name,
                    server_id,
                    name
                );
            }

            catalog.entries.push(ToolDescriptor {
                name: name.clone(),
                original_name: tool.name,
                description: tool.description.or(tool.title).unwrap_or_default(),
                input_schema: tool.input_schema,
                owner_session_id: server_id.clone(),
            });
            names.push(name);
        }
        catalog.sessions.insert(server_id.clone(), session);

        tracing::debug!("Registered {} tools from `{}`", names.len(), server_id);
        Ok(names)
    }

    /// Remove all descriptors owned by `session_id`
    ///
    /// # Returns
    ///
    /// Returns the number of descriptors removed
    pub async fn unregister(&self, session_id: &str) -> usize {
        let removed = self.state.write().await.remove_session(session_id);
        if removed > 0 {
            tracing::info!("Removed {} tools of `{}` from the catalog", removed, session_id);
        }
        removed
    }

    /// Look up a descriptor by catalog name
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::ToolNotFound`] if no descriptor matches.
    pub async fn resolve(&self, name: &str) -> Result<ToolDescriptor> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| McpHostError::ToolNotFound(name.to_string()).into())
    }

    /// Call a tool through its owning session
    ///
    /// `timeout` of `None` uses the session's configured tool timeout.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::ToolNotFound`] for an unknown name, otherwise
    /// whatever [`ServerSession::call_tool`] returns.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<CallToolResponse> {
        let (descriptor, session) = {
            let catalog = self.state.read().await;
            let descriptor = catalog
                .entries
                .iter()
                .find(|d| d.name == name)
                .cloned()
                .ok_or_else(|| McpHostError::ToolNotFound(name.to_string()))?;
            let session = catalog
                .sessions
                .get(&descriptor.owner_session_id)
                .cloned()
                .ok_or_else(|| McpHostError::ToolNotFound(name.to_string()))?;
            (descriptor, session)
        };

        tracing::debug!(
            "Dispatching `{}` to `{}` as `{}`",
            name,
            descriptor.owner_session_id,
            descriptor.original_name
        );
        session
            .call_tool(&descriptor.original_name, Some(arguments), timeout)
            .await
    }

    /// All descriptors in registration order
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.state.read().await.entries.clone()
    }

    /// Number of descriptors owned by `session_id`
    pub async fn tool_count(&self, session_id: &str) -> usize {
        self.state
            .read()
            .await
            .entries
            .iter()
            .filter(|d| d.owner_session_id == session_id)
            .count()
    }

    /// Registered sessions, ordered by id
    pub async fn sessions(&self) -> Vec<Arc<ServerSession>> {
        let mut sessions: Vec<_> = self.state.read().await.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    /// Total number of descriptors
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Whether the catalog holds no descriptors
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}
