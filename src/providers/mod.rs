//! Model backends
//!
//! This module contains the [`ModelAdapter`] abstraction and the closed set
//! of supported backends. New backends are added as [`Provider`] variants;
//! the orchestration loop only sees `dyn ModelAdapter`.

pub mod base;
pub mod ollama;

pub use base::{
    validate_message_sequence, validate_tool_calls, CompletionParams, Message, ModelAdapter,
    Response, Role, ToolCall,
};
pub use ollama::OllamaAdapter;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::{McpHostError, Result};
use crate::tools::ToolDescriptor;

/// A configured model backend
pub enum Provider {
    /// Local or remote Ollama server
    Ollama(OllamaAdapter),
}

impl Provider {
    /// Model name the backend runs
    pub fn model(&self) -> &str {
        match self {
            Provider::Ollama(adapter) => adapter.model(),
        }
    }
}

#[async_trait]
impl ModelAdapter for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::Ollama(adapter) => adapter.name(),
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<Response> {
        match self {
            Provider::Ollama(adapter) => adapter.complete(messages, tools, params).await,
        }
    }
}

/// Create a provider instance based on configuration
///
/// # Arguments
///
/// * `config` - Provider configuration
///
/// # Errors
///
/// Returns [`McpHostError::Configuration`] if the provider type is unknown,
/// or the backend's initialization error.
///
/// # Examples
///
/// ```
/// use mcphost::config::ProviderConfig;
/// use mcphost::providers::create_provider;
///
/// let provider = create_provider(&ProviderConfig::default()).unwrap();
/// assert_eq!(provider.model(), "llama3");
///
/// let unknown = ProviderConfig {
///     provider_type: "copilot".to_string(),
///     ..Default::default()
/// };
/// assert!(create_provider(&unknown).is_err());
/// ```
pub fn create_provider(config: &ProviderConfig) -> Result<Provider> {
    match config.provider_type.as_str() {
        "ollama" => Ok(Provider::Ollama(OllamaAdapter::new(config)?)),
        other => Err(McpHostError::Configuration(format!(
            "Unknown provider type: {}",
            other
        ))
        .into()),
    }
}
