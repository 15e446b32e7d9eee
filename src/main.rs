//! mcphost - connect a local language model to MCP tool servers
//!
#![doc = "mcphost - connect a local language model to MCP tool servers"]
#![doc = "Main entry point for the mcphost binary."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcphost::cli::Cli;
use mcphost::commands;
use mcphost::config::Config;
use mcphost::host::HostContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.debug, cli.log_json);

    // Load configuration
    let config = Config::load(&cli.config, &cli)?;
    config.validate()?;

    if cli.save_config {
        config.save(&cli.config)?;
    }

    let mut host = HostContext::start(config).await?;

    let result = match &cli.prompt {
        Some(prompt) => {
            tracing::debug!("Running one-shot prompt");
            commands::run_prompt(&host, prompt).await
        }
        None => commands::chat::run_chat(&host).await,
    };

    host.shutdown().await;
    result
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over the `--debug` default.
fn init_tracing(debug: bool, json: bool) {
    let default_filter = if debug { "mcphost=debug" } else { "mcphost=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
