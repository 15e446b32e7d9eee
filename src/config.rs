//! Configuration management for mcphost
//!
//! This module handles loading, parsing, validating, and saving the host
//! configuration from files, environment variables, and CLI overrides.
//!
//! The on-disk document is JSON by default (`config.json`); paths ending in
//! `.yaml` or `.yml` are read and written as YAML.

use crate::error::{McpHostError, Result};
use crate::mcp::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for mcphost
///
/// Holds the set of MCP servers to connect to, the language-model provider
/// block, the conversation window, and orchestration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// MCP servers keyed by server identifier
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Language-model provider configuration
    #[serde(default)]
    pub llm_provider: ProviderConfig,
    /// Maximum number of messages kept in the conversation (0 = unbounded)
    #[serde(default = "default_message_window")]
    pub message_window: usize,
    /// Optional system prompt, pinned at the head of the conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Orchestration loop limits and timeouts
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

fn default_message_window() -> usize {
    10
}

/// Configuration for a single MCP server
///
/// `type` selects the transport: `stdio` spawns `command` with `args`,
/// `sse` connects to `url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Transport kind (defaults to stdio)
    #[serde(rename = "type", default)]
    pub transport: TransportKind,

    /// Executable to spawn (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments passed to the executable (stdio)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment variables for the child process (stdio)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory for the child process (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Event-stream URL (sse)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Extra HTTP headers sent with every request (sse)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Per-server tool-call timeout override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl McpServerConfig {
    /// Build a stdio server entry
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::config::McpServerConfig;
    ///
    /// let server = McpServerConfig::stdio("uvx", &["mcp-server-time"]);
    /// assert!(server.validate("time").is_ok());
    /// ```
    pub fn stdio(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Build an sse server entry
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Sse,
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Validate the transport-specific fields of this entry
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Configuration`] when a stdio server has no
    /// command, or an sse server has no `http(s)://` URL.
    pub fn validate(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(
                McpHostError::Configuration("server id cannot be empty".to_string()).into(),
            );
        }

        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(McpHostError::Configuration(format!(
                        "server `{}` is missing required `command` for stdio transport",
                        id
                    ))
                    .into());
                }
            }
            TransportKind::Sse => {
                let url = self.url.as_deref().unwrap_or_default();
                if url.is_empty() {
                    return Err(McpHostError::Configuration(format!(
                        "server `{}` is missing required `url` for sse transport",
                        id
                    ))
                    .into());
                }
                if !is_http_url(url) {
                    return Err(McpHostError::Configuration(format!(
                        "server `{}` has invalid url `{}`: must start with http:// or https://",
                        id, url
                    ))
                    .into());
                }
            }
        }

        if self.timeout_seconds == Some(0) {
            return Err(McpHostError::Configuration(format!(
                "server `{}` timeoutSeconds must be greater than 0",
                id
            ))
            .into());
        }

        Ok(())
    }

    /// Parse the configured sse URL
    pub fn sse_url(&self, id: &str) -> Result<url::Url> {
        let raw = self.url.as_deref().unwrap_or_default();
        url::Url::parse(raw).map_err(|e| {
            McpHostError::Configuration(format!("server `{}` has invalid url `{}`: {}", id, raw, e))
                .into()
        })
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Language-model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider kind (currently `ollama`)
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the provider API
    #[serde(default = "default_provider_url")]
    pub url: String,

    /// Sampling options forwarded to the backend
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// HTTP timeout for a single backend request in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

fn default_provider_type() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_provider_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_provider_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            model: default_model(),
            url: default_provider_url(),
            parameters: serde_json::Map::new(),
            timeout_seconds: default_provider_timeout(),
        }
    }
}

/// Orchestration loop limits and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationConfig {
    /// Maximum model round-trips per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Timeout for a single tool call in seconds
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_seconds: u64,

    /// Timeout for a single model completion in seconds
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_seconds: u64,

    /// Timeout for the MCP handshake (initialize + tools/list) in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,

    /// Dispatch the tool calls of one model response concurrently
    #[serde(default)]
    pub parallel_tool_calls: bool,

    /// Upper bound for closing all sessions on shutdown in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    /// Event-stream reconnect policy for sse servers
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_max_iterations() -> usize {
    5
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_completion_timeout() -> u64 {
    120
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_seconds: default_tool_timeout(),
            completion_timeout_seconds: default_completion_timeout(),
            handshake_timeout_seconds: default_handshake_timeout(),
            parallel_tool_calls: false,
            shutdown_timeout_seconds: default_shutdown_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl OrchestrationConfig {
    /// Tool-call timeout as a [`Duration`]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }

    /// Model completion timeout as a [`Duration`]
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_seconds)
    }

    /// Handshake timeout as a [`Duration`]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    /// Shutdown budget as a [`Duration`]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Reconnect policy for dropped event streams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// Consecutive failed reconnect attempts before the transport fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first reconnect attempt in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap for any single reconnect delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file (JSON, or YAML by extension)
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default_config()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            mcp_servers: BTreeMap::new(),
            llm_provider: ProviderConfig::default(),
            message_window: default_message_window(),
            system_prompt: None,
            orchestration: OrchestrationConfig::default(),
        }
    }

    /// Parse a configuration file without applying overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            McpHostError::Configuration(format!("Failed to read config file: {}", e))
        })?;

        if is_yaml_path(path) {
            serde_yaml::from_str(&contents).map_err(|e| {
                McpHostError::Configuration(format!("Failed to parse config: {}", e)).into()
            })
        } else {
            serde_json::from_str(&contents).map_err(|e| {
                McpHostError::Configuration(format!("Failed to parse config: {}", e)).into()
            })
        }
    }

    /// Write the configuration back to `path`
    ///
    /// The format follows the file extension, as in [`Config::from_file`].
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub fn save(&self, path: &str) -> Result<()> {
        let contents = if is_yaml_path(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, contents)?;
        tracing::info!("Saved configuration to {}", path);
        Ok(())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(provider_type) = std::env::var("MCPHOST_PROVIDER") {
            self.llm_provider.provider_type = provider_type;
        }

        if let Ok(model) = std::env::var("MCPHOST_MODEL") {
            self.llm_provider.model = model;
        }

        if let Ok(url) = std::env::var("MCPHOST_OLLAMA_URL") {
            self.llm_provider.url = url;
        }

        if let Ok(window) = std::env::var("MCPHOST_MESSAGE_WINDOW") {
            if let Ok(value) = window.parse() {
                self.message_window = value;
            } else {
                tracing::warn!("Invalid MCPHOST_MESSAGE_WINDOW: {}", window);
            }
        }

        if let Ok(max_iterations) = std::env::var("MCPHOST_MAX_ITERATIONS") {
            if let Ok(value) = max_iterations.parse() {
                self.orchestration.max_iterations = value;
            } else {
                tracing::warn!("Invalid MCPHOST_MAX_ITERATIONS: {}", max_iterations);
            }
        }

        if let Ok(timeout) = std::env::var("MCPHOST_TOOL_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.orchestration.tool_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid MCPHOST_TOOL_TIMEOUT_SECONDS: {}", timeout);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(provider) = &cli.provider {
            self.llm_provider.provider_type = provider.clone();
        }
        if let Some(model) = &cli.model {
            self.llm_provider.model = model.clone();
        }
        if let Some(url) = &cli.ollama_url {
            self.llm_provider.url = url.clone();
        }
        if let Some(window) = cli.message_window {
            self.message_window = window;
        }
        if let Some(max_iterations) = cli.max_iterations {
            self.orchestration.max_iterations = max_iterations;
        }
        if cli.parallel_tools {
            self.orchestration.parallel_tool_calls = true;
        }
        if cli.debug {
            tracing::debug!("Debug logging enabled");
        }
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges
    /// and that every server entry is usable.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Configuration`] if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let valid_providers = ["ollama"];
        if !valid_providers.contains(&self.llm_provider.provider_type.as_str()) {
            return Err(McpHostError::Configuration(format!(
                "Invalid provider type: {}. Must be one of: {}",
                self.llm_provider.provider_type,
                valid_providers.join(", ")
            ))
            .into());
        }

        if self.llm_provider.model.trim().is_empty() {
            return Err(
                McpHostError::Configuration("Provider model cannot be empty".to_string()).into(),
            );
        }

        if !is_http_url(&self.llm_provider.url) {
            return Err(McpHostError::Configuration(format!(
                "Provider url must start with http:// or https://, got `{}`",
                self.llm_provider.url
            ))
            .into());
        }

        if self.llm_provider.timeout_seconds == 0 {
            return Err(McpHostError::Configuration(
                "llmProvider.timeoutSeconds must be greater than 0".to_string(),
            )
            .into());
        }

        let orchestration = &self.orchestration;
        if orchestration.max_iterations == 0 {
            return Err(McpHostError::Configuration(
                "maxIterations must be greater than 0".to_string(),
            )
            .into());
        }

        if orchestration.max_iterations > 100 {
            return Err(McpHostError::Configuration(
                "maxIterations must be less than or equal to 100".to_string(),
            )
            .into());
        }

        let timeouts = [
            ("toolTimeoutSeconds", orchestration.tool_timeout_seconds),
            (
                "completionTimeoutSeconds",
                orchestration.completion_timeout_seconds,
            ),
            (
                "handshakeTimeoutSeconds",
                orchestration.handshake_timeout_seconds,
            ),
            (
                "shutdownTimeoutSeconds",
                orchestration.shutdown_timeout_seconds,
            ),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(McpHostError::Configuration(format!(
                    "orchestration.{} must be greater than 0",
                    name
                ))
                .into());
            }
        }

        if self.system_prompt.is_some() && self.message_window == 1 {
            return Err(McpHostError::Configuration(
                "messageWindow must be 0 or at least 2 when a system prompt is configured"
                    .to_string(),
            )
            .into());
        }

        for (id, server) in &self.mcp_servers {
            server.validate(id)?;
        }

        Ok(())
    }
}

fn is_yaml_path(path: &str) -> bool {
    matches!(
        Path::new(path).extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
