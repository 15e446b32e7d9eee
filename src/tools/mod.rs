//! Tool catalog and tool-call data types
//!
//! This module contains the provider-neutral description of a tool, the
//! transient record of one invocation, and the outcome handed back to the
//! model. The [`catalog`] submodule merges the tools of every ready server
//! session into one namespace.

pub mod catalog;

pub use catalog::ToolCatalog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::McpHostError;
use crate::mcp::types::CallToolResponse;

/// Tool descriptor as exposed to the model
///
/// `name` is unique within the catalog. `original_name` is the name the
/// owning server knows the tool by; the two differ only when the catalog
/// had to disambiguate a collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Catalog-unique name of the tool
    pub name: String,
    /// Name of the tool on its server
    pub original_name: String,
    /// Description of what the tool does
    pub description: String,
    /// JSON schema for the tool's parameters
    pub input_schema: serde_json::Value,
    /// Identifier of the server session that owns the tool
    pub owner_session_id: String,
}

impl ToolDescriptor {
    /// Create a descriptor whose catalog name equals its server name
    ///
    /// # Arguments
    ///
    /// * `name` - Tool name
    /// * `description` - Tool description
    /// * `input_schema` - JSON schema for parameters
    /// * `owner_session_id` - Owning server identifier
    ///
    /// # Returns
    ///
    /// Returns a new ToolDescriptor
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        owner_session_id: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            original_name: name.clone(),
            name,
            description: description.into(),
            input_schema,
            owner_session_id: owner_session_id.into(),
        }
    }
}

/// One tool call, alive for the duration of its dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Call identifier assigned by the model (or the adapter)
    pub call_id: String,
    /// Catalog name of the tool
    pub tool_name: String,
    /// Arguments with null-valued top-level keys removed
    pub arguments: serde_json::Value,
    /// When the call was issued
    pub issued_at: DateTime<Utc>,
}

impl ToolInvocation {
    /// Create an invocation stamped with the current time
    ///
    /// Top-level `null` arguments are dropped before dispatch.
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments: strip_null_arguments(arguments),
            issued_at: Utc::now(),
        }
    }
}

/// Remove `null`-valued keys from a top-level argument object
///
/// # Examples
///
/// ```
/// use mcphost::tools::strip_null_arguments;
/// use serde_json::json;
///
/// let args = strip_null_arguments(json!({"city": "Paris", "units": null}));
/// assert_eq!(args, json!({"city": "Paris"}));
/// ```
pub fn strip_null_arguments(arguments: serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        ),
        other => other,
    }
}

/// Category of a failed tool call, as reported to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// The call exceeded its timeout
    ToolTimeout,
    /// The tool ran and reported failure, or the server rejected the call
    ToolError,
    /// The owning session is not ready
    SessionUnavailable,
    /// The channel to the server broke
    TransportError,
    /// No such tool in the catalog
    NotFound,
}

impl ToolFailureKind {
    /// Wire name used in error payloads
    pub fn as_str(self) -> &'static str {
        match self {
            ToolFailureKind::ToolTimeout => "tool_timeout",
            ToolFailureKind::ToolError => "tool_error",
            ToolFailureKind::SessionUnavailable => "session_unavailable",
            ToolFailureKind::TransportError => "transport_error",
            ToolFailureKind::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for ToolFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool call carried to the model as data
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFailure {
    /// Failure category
    pub kind: ToolFailureKind,
    /// Human-readable reason
    pub message: String,
}

impl ToolFailure {
    /// Create a failure of the given kind
    pub fn new(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an error raised while dispatching a call
    pub fn from_error(err: &anyhow::Error) -> Self {
        let kind = match err.downcast_ref::<McpHostError>() {
            Some(McpHostError::ToolTimeout { .. }) => ToolFailureKind::ToolTimeout,
            Some(McpHostError::SessionUnavailable { .. }) => ToolFailureKind::SessionUnavailable,
            Some(McpHostError::Transport(_)) => ToolFailureKind::TransportError,
            Some(McpHostError::ToolNotFound(_)) => ToolFailureKind::NotFound,
            _ => ToolFailureKind::ToolError,
        };
        Self::new(kind, err.to_string())
    }

    /// JSON error payload, e.g. `{"error":{"kind":"tool_timeout","message":"..."}}`
    pub fn to_payload(&self) -> String {
        serde_json::json!({
            "error": {
                "kind": self.kind.as_str(),
                "message": self.message,
            }
        })
        .to_string()
    }
}

/// What a dispatched call produced
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Rendered tool output
    Output(String),
    /// The call failed
    Error(ToolFailure),
}

/// Tool result paired with the call that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Identifier of the originating call
    pub call_id: String,
    /// Catalog name of the tool
    pub tool_name: String,
    /// Success payload or failure
    pub outcome: ToolOutcome,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            outcome: ToolOutcome::Output(output.into()),
        }
    }

    /// Create a failed result
    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        failure: ToolFailure,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            outcome: ToolOutcome::Error(failure),
        }
    }

    /// Build a result from a dispatch outcome
    ///
    /// A response flagged `isError` becomes a [`ToolFailureKind::ToolError`];
    /// a dispatch error is classified with [`ToolFailure::from_error`].
    pub fn from_dispatch(
        invocation: &ToolInvocation,
        outcome: crate::error::Result<CallToolResponse>,
    ) -> Self {
        match outcome {
            Ok(response) if response.is_error == Some(true) => Self::failure(
                &invocation.call_id,
                &invocation.tool_name,
                ToolFailure::new(ToolFailureKind::ToolError, response.text()),
            ),
            Ok(response) => {
                Self::success(&invocation.call_id, &invocation.tool_name, response.text())
            }
            Err(e) => Self::failure(
                &invocation.call_id,
                &invocation.tool_name,
                ToolFailure::from_error(&e),
            ),
        }
    }

    /// Whether the call failed
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    /// Content of the tool message sent back to the model
    pub fn to_content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Output(output) => output.clone(),
            ToolOutcome::Error(failure) => failure.to_payload(),
        }
    }
}
