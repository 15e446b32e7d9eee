//! Ollama model adapter
//!
//! This module implements [`ModelAdapter`] for Ollama's `/api/chat`
//! endpoint with tool calling support. Transient failures (connection
//! errors, timeouts, HTTP 503) are retried with exponential backoff.

use crate::config::ProviderConfig;
use crate::error::{McpHostError, Result};
use crate::providers::{
    validate_message_sequence, validate_tool_calls, CompletionParams, Message, ModelAdapter,
    Response, Role, ToolCall,
};
use crate::retry::Backoff;
use crate::tools::{strip_null_arguments, ToolDescriptor};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default sampling temperature
const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Default cap on generated tokens
const DEFAULT_NUM_PREDICT: u64 = 1024;

/// Ollama chat adapter
///
/// # Examples
///
/// ```no_run
/// use mcphost::config::ProviderConfig;
/// use mcphost::providers::{CompletionParams, Message, ModelAdapter, OllamaAdapter};
///
/// # async fn example() -> mcphost::error::Result<()> {
/// let adapter = OllamaAdapter::new(&ProviderConfig::default())?;
/// let response = adapter
///     .complete(&[Message::user("Hello!")], &[], &CompletionParams::default())
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct OllamaAdapter {
    client: Client,
    base_url: String,
    model: String,
    backoff: Backoff,
}

/// Request body for `/api/chat`
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    stream: bool,
    options: serde_json::Map<String, serde_json::Value>,
}

/// Message structure for Ollama API
#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

/// Tool definition for Ollama API
#[derive(Debug, Serialize)]
struct OllamaTool {
    r#type: &'static str,
    function: OllamaFunction,
}

/// Function definition for Ollama tools
#[derive(Debug, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

/// Tool call in Ollama format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: OllamaFunctionCall,
}

/// Function call details in Ollama format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Response body from `/api/chat`
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: usize,
    #[serde(default)]
    eval_count: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

impl OllamaAdapter {
    /// Create a new Ollama adapter
    ///
    /// # Arguments
    ///
    /// * `config` - Provider configuration (URL, model, HTTP timeout)
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("mcphost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| McpHostError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            "Initialized Ollama adapter: url={}, model={}",
            config.url,
            config.model
        );

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            backoff: Backoff::default(),
        })
    }

    /// Replace the retry policy for transient failures
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Get the configured model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the configured base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> OllamaRequest {
        let mut options = serde_json::Map::new();
        options.insert("temperature".to_string(), DEFAULT_TEMPERATURE.into());
        options.insert("num_predict".to_string(), DEFAULT_NUM_PREDICT.into());
        for (key, value) in &params.options {
            options.insert(key.clone(), value.clone());
        }

        OllamaRequest {
            model: self.model.clone(),
            messages: convert_messages(messages),
            tools: convert_tools(tools),
            stream: false,
            options,
        }
    }

    /// POST the request, retrying transient failures
    async fn send_with_retry(&self, request: &OllamaRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let mut retries = 0u32;

        loop {
            let transient = match self.client.post(&url).json(request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.text().await.map_err(|e| {
                            McpHostError::Provider(format!("Failed to read Ollama response: {}", e))
                                .into()
                        });
                    }
                    let error_text = response.text().await.unwrap_or_default();
                    if status != StatusCode::SERVICE_UNAVAILABLE {
                        tracing::error!("Ollama returned error {}: {}", status, error_text);
                        return Err(McpHostError::Provider(format!(
                            "Ollama returned error {}: {}",
                            status, error_text
                        ))
                        .into());
                    }
                    format!("Ollama returned {}: {}", status, error_text)
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    format!("Ollama request failed: {}", e)
                }
                Err(e) => {
                    tracing::error!("Ollama request failed: {}", e);
                    return Err(
                        McpHostError::Provider(format!("Ollama request failed: {}", e)).into(),
                    );
                }
            };

            if !self.backoff.allows(retries) {
                tracing::error!("{} (giving up after {} retries)", transient, retries);
                return Err(McpHostError::Provider(transient).into());
            }
            retries += 1;
            let delay = self.backoff.delay_for_attempt(retries);
            tracing::warn!("{}; retrying in {:?}", transient, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Convert conversation messages to Ollama format
///
/// Orphan tool messages are dropped; tool messages carry `tool_name`.
fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
    validate_message_sequence(messages)
        .into_iter()
        .map(|m| OllamaMessage {
            role: m.role,
            content: m.content.unwrap_or_default(),
            tool_calls: m
                .tool_calls
                .into_iter()
                .map(|call| OllamaToolCall {
                    id: Some(call.id),
                    function: OllamaFunctionCall {
                        name: call.name,
                        arguments: call.arguments,
                    },
                })
                .collect(),
            tool_name: m.tool_result.map(|r| r.tool_name),
        })
        .collect()
}

/// Convert catalog descriptors to Ollama function tools, in catalog order
fn convert_tools(tools: &[ToolDescriptor]) -> Vec<OllamaTool> {
    tools
        .iter()
        .map(|t| OllamaTool {
            r#type: "function",
            function: OllamaFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Turn a raw `/api/chat` body into a [`Response`]
fn parse_response(body: &str, tools: &[ToolDescriptor]) -> Result<Response> {
    let response: OllamaResponse = serde_json::from_str(body).map_err(|e| {
        tracing::error!("Failed to parse Ollama response: {}", e);
        McpHostError::AdapterProtocol(format!("Failed to parse Ollama response: {}", e))
    })?;

    tracing::debug!(
        "Ollama response: done={}, prompt_tokens={}, completion_tokens={}",
        response.done,
        response.prompt_eval_count,
        response.eval_count
    );

    let OllamaResponseMessage {
        content,
        tool_calls,
    } = response.message;

    if tool_calls.is_empty() {
        return Ok(Response::FinalText(content));
    }

    let calls = tool_calls
        .into_iter()
        .map(|tc| -> Result<ToolCall> {
            let arguments = match tc.function.arguments {
                serde_json::Value::String(raw) => serde_json::from_str(&raw).map_err(|e| {
                    McpHostError::AdapterProtocol(format!(
                        "arguments for `{}` are not valid JSON: {}",
                        tc.function.name, e
                    ))
                })?,
                serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
                other => other,
            };
            let arguments = strip_null_arguments(arguments);
            let id = tc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
            Ok(ToolCall::new(id, tc.function.name, arguments))
        })
        .collect::<Result<Vec<_>>>()?;

    validate_tool_calls(&calls, tools)?;

    let text = Some(content).filter(|c| !c.trim().is_empty());
    if let Some(text) = &text {
        tracing::debug!("Ollama sent text alongside tool calls: {}", text);
    }
    Ok(Response::ToolCallsRequested { calls, text })
}

#[async_trait]
impl ModelAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<Response> {
        let request = self.build_request(messages, tools, params);

        tracing::debug!(
            "Sending Ollama request: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let body = self.send_with_retry(&request).await?;
        parse_response(&body, tools)
    }
}
