//! Model adapter trait and provider-neutral conversation types
//!
//! This module defines the [`ModelAdapter`] trait every backend implements,
//! the [`Message`] type stored in the conversation window, and the
//! two-variant [`Response`] an adapter produces. It also holds the
//! validation helpers adapters share: tool-call checking against the
//! catalog's schemas, and orphan tool-message removal.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{McpHostError, Result};
use crate::tools::{ToolDescriptor, ToolResult};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Pinned instruction message
    System,
    /// Human input
    User,
    /// Model output
    Assistant,
    /// Tool result fed back to the model
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, unique within one response
    pub id: String,
    /// Catalog name of the tool
    pub name: String,
    /// Structured arguments
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Message structure for conversation
///
/// Messages are immutable once appended to the conversation window. A
/// `tool` message carries the [`ToolResult`] it was built from, so the
/// pairing with the originating call survives eviction and reordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Text content
    pub content: Option<String>,
    /// Tool calls requested by an assistant message, in order
    pub tool_calls: Vec<ToolCall>,
    /// Result carried by a tool message
    pub tool_result: Option<ToolResult>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::providers::{Message, Role};
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Creates an assistant message carrying tool calls
    ///
    /// # Arguments
    ///
    /// * `tool_calls` - The calls, in the order the model issued them
    pub fn assistant_with_tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls,
            tool_result: None,
        }
    }

    /// Creates a tool message from a tool result
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::providers::{Message, Role};
    /// use mcphost::tools::ToolResult;
    ///
    /// let msg = Message::tool_result(ToolResult::success("call_1", "get_weather", "18C"));
    /// assert_eq!(msg.role, Role::Tool);
    /// assert_eq!(msg.tool_call_id(), Some("call_1"));
    /// assert_eq!(msg.content.as_deref(), Some("18C"));
    /// ```
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: Some(result.to_content()),
            tool_calls: Vec::new(),
            tool_result: Some(result),
        }
    }

    /// Attach text to a message, typically the preamble an assistant sent
    /// with its tool calls
    ///
    /// Blank text is ignored.
    pub fn with_content(mut self, content: Option<String>) -> Self {
        if let Some(text) = content.filter(|t| !t.trim().is_empty()) {
            self.content = Some(text);
        }
        self
    }

    /// Identifier of the call a tool message answers
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.call_id.as_str())
    }
}

/// What a completion produced
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Plain answer; the turn is over
    FinalText(String),
    /// The model wants these tools called, in order
    ToolCallsRequested {
        /// Requested calls, in the order the model issued them
        calls: Vec<ToolCall>,
        /// Text the model sent alongside the calls, if any
        text: Option<String>,
    },
}

impl Response {
    /// Tool calls without accompanying text
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Response::ToolCallsRequested { calls, text: None }
    }
}

/// Sampling parameters passed through to the backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionParams {
    /// Backend-specific options (temperature, token limit, ...)
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl CompletionParams {
    /// Build parameters from a provider `parameters` block
    pub fn from_map(options: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { options }
    }
}

/// Translates the conversation into backend requests and back
///
/// # Examples
///
/// ```no_run
/// use mcphost::providers::{CompletionParams, Message, ModelAdapter, Response};
/// use mcphost::tools::ToolDescriptor;
/// use mcphost::error::Result;
/// use async_trait::async_trait;
///
/// struct EchoAdapter;
///
/// #[async_trait]
/// impl ModelAdapter for EchoAdapter {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     async fn complete(
///         &self,
///         messages: &[Message],
///         _tools: &[ToolDescriptor],
///         _params: &CompletionParams,
///     ) -> Result<Response> {
///         let last = messages.last().and_then(|m| m.content.clone()).unwrap_or_default();
///         Ok(Response::FinalText(last))
///     }
/// }
/// ```
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Run one completion
    ///
    /// # Arguments
    ///
    /// * `messages` - Conversation window snapshot, oldest first
    /// * `tools` - Catalog descriptors, in catalog order
    /// * `params` - Sampling parameters
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Provider`] if the backend cannot be reached
    /// and [`McpHostError::AdapterProtocol`] if its answer cannot be
    /// interpreted, including tool calls that name an unknown tool or carry
    /// arguments violating the tool's schema.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<Response>;
}

/// Check model-proposed tool calls against the catalog
///
/// Every call must name a known tool and carry an argument object that
/// satisfies the tool's input schema. A schema that cannot be compiled is
/// skipped with a warning.
///
/// # Errors
///
/// Returns [`McpHostError::AdapterProtocol`] describing the first bad call.
pub fn validate_tool_calls(calls: &[ToolCall], tools: &[ToolDescriptor]) -> Result<()> {
    let by_name: HashMap<&str, &ToolDescriptor> =
        tools.iter().map(|t| (t.name.as_str(), t)).collect();

    for call in calls {
        let Some(tool) = by_name.get(call.name.as_str()) else {
            return Err(McpHostError::AdapterProtocol(format!(
                "model requested unknown tool `{}`",
                call.name
            ))
            .into());
        };

        if !call.arguments.is_object() {
            return Err(McpHostError::AdapterProtocol(format!(
                "arguments for `{}` must be an object, got {}",
                call.name, call.arguments
            ))
            .into());
        }

        let validator = match jsonschema::validator_for(&tool.input_schema) {
            Ok(validator) => validator,
            Err(e) => {
                tracing::warn!(
                    "Input schema of `{}` is not a valid JSON Schema, skipping validation: {}",
                    tool.name,
                    e
                );
                continue;
            }
        };

        if !validator.is_valid(&call.arguments) {
            let problems: Vec<String> = validator
                .iter_errors(&call.arguments)
                .map(|e| e.to_string())
                .collect();
            return Err(McpHostError::AdapterProtocol(format!(
                "arguments for `{}` violate its schema: {}",
                call.name,
                problems.join("; ")
            ))
            .into());
        }
    }

    Ok(())
}

/// Drop tool messages whose originating call is no longer in the window
///
/// Window eviction can remove an assistant tool-call message while keeping
/// its results; backends reject such orphans.
///
/// # Examples
///
/// ```
/// use mcphost::providers::{validate_message_sequence, Message};
/// use mcphost::tools::ToolResult;
///
/// let messages = vec![
///     Message::user("Do something"),
///     Message::tool_result(ToolResult::success("call_123", "search", "Result")),
/// ];
/// let validated = validate_message_sequence(&messages);
/// assert_eq!(validated.len(), 1);
/// ```
pub fn validate_message_sequence(messages: &[Message]) -> Vec<Message> {
    let valid_ids: HashSet<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.as_str()))
        .collect();

    messages
        .iter()
        .filter(|message| {
            if message.role != Role::Tool {
                return true;
            }
            match message.tool_call_id() {
                Some(id) if valid_ids.contains(id) => true,
                Some(id) => {
                    tracing::warn!("Dropping orphan tool message with call id: {}", id);
                    false
                }
                None => {
                    tracing::warn!("Dropping tool message without call id");
                    false
                }
            }
        })
        .cloned()
        .collect()
}
