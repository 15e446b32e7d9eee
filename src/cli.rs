//! Command-line interface definition for mcphost
//!
//! This module defines the CLI structure using clap's derive API. Every
//! flag except `--config`, `--log-json`, `--save-config` and `--prompt`
//! overrides the matching configuration value.

use clap::Parser;

/// mcphost - connect a local language model to MCP tool servers
///
/// Starts every configured MCP server, merges their tools into one catalog
/// and opens an interactive chat that lets the model call those tools.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "mcphost")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (JSON, or YAML by extension)
    #[arg(short, long, default_value = "config.json")]
    pub config: String,

    /// Model name to request from the provider
    #[arg(short, long, visible_alias = "ollama-model")]
    pub model: Option<String>,

    /// Override the provider type from config (ollama)
    #[arg(long)]
    pub provider: Option<String>,

    /// Base URL of the Ollama server
    #[arg(long)]
    pub ollama_url: Option<String>,

    /// Number of messages kept in the conversation window (0 = unbounded)
    #[arg(long)]
    pub message_window: Option<usize>,

    /// Maximum model completions per user turn
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Dispatch the tool calls of one response concurrently
    #[arg(long)]
    pub parallel_tools: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    pub save_config: bool,

    /// Run a single prompt and exit instead of starting the chat
    #[arg(short, long)]
    pub prompt: Option<String>,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: "config.json".to_string(),
            model: None,
            provider: None,
            ollama_url: None,
            message_window: None,
            max_iterations: None,
            parallel_tools: false,
            debug: false,
            log_json: false,
            save_config: false,
            prompt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_matches_empty_invocation() {
        let cli = Cli::try_parse_from(["mcphost"]).unwrap();
        assert_eq!(cli, Cli::default());
    }

    #[test]
    fn test_cli_parse_overrides() {
        let cli = Cli::try_parse_from([
            "mcphost",
            "-c",
            "servers.yaml",
            "-m",
            "qwen2.5",
            "--provider",
            "ollama",
            "--ollama-url",
            "http://gpu-box:11434",
            "--message-window",
            "20",
            "--max-iterations",
            "8",
            "--parallel-tools",
            "--debug",
        ])
        .unwrap();

        assert_eq!(cli.config, "servers.yaml");
        assert_eq!(cli.model.as_deref(), Some("qwen2.5"));
        assert_eq!(cli.provider.as_deref(), Some("ollama"));
        assert_eq!(cli.ollama_url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(cli.message_window, Some(20));
        assert_eq!(cli.max_iterations, Some(8));
        assert!(cli.parallel_tools);
        assert!(cli.debug);
        assert!(!cli.log_json);
    }

    #[test]
    fn test_cli_parse_one_shot_prompt() {
        let cli = Cli::try_parse_from(["mcphost", "-p", "What's the weather in Paris?"]).unwrap();
        assert_eq!(cli.prompt.as_deref(), Some("What's the weather in Paris?"));
    }

    #[test]
    fn test_cli_parse_save_config_and_json_logs() {
        let cli = Cli::try_parse_from(["mcphost", "--save-config", "--log-json"]).unwrap();
        assert!(cli.save_config);
        assert!(cli.log_json);
    }

    #[test]
    fn test_cli_parse_ollama_model_alias() {
        let cli = Cli::try_parse_from(["mcphost", "--ollama-model", "qwen2.5"]).unwrap();
        assert_eq!(cli.model.as_deref(), Some("qwen2.5"));
    }

    #[test]
    fn test_cli_rejects_non_numeric_window() {
        assert!(Cli::try_parse_from(["mcphost", "--message-window", "many"]).is_err());
    }
}
