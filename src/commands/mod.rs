/*!
Command handlers for the CLI

This module provides the handlers invoked by the binary entrypoint:

- `chat` -- Interactive chat over the host context
- `run_prompt` -- One-shot mode: a single turn, printed and done

Both take an already-started [`HostContext`]; the caller owns startup and
shutdown.
*/

use colored::Colorize;
use prettytable::{format, row, Table};
use tokio_util::sync::CancellationToken;

use crate::agent::{Orchestrator, TurnOutcome};
use crate::error::Result;
use crate::host::{HostContext, ServerStatus};
use crate::mcp::SessionState;
use crate::tools::ToolDescriptor;

// Special commands parser for the chat prompt
pub mod special_commands;

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Runs a readline loop that hands every non-command line to the
    //! orchestrator. Ctrl-C during a turn cancels that turn; Ctrl-C or
    //! Ctrl-D at the prompt leaves the chat.

    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::*;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `host` - Started host context
    ///
    /// # Errors
    ///
    /// Returns an error if the line editor cannot be created. Turn errors
    /// are printed and the chat continues.
    pub async fn run_chat(host: &HostContext) -> Result<()> {
        tracing::info!("Starting interactive chat mode");

        let orchestrator = host.orchestrator();
        let mut rl = DefaultEditor::new()?;

        print_welcome_banner(host).await;

        loop {
            match rl.readline(&format!("{} ", ">>".green().bold())) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed)?;

                    match parse_special_command(trimmed) {
                        SpecialCommand::Exit => break,
                        SpecialCommand::ListTools => {
                            print_tools(&host.list_tools().await);
                            continue;
                        }
                        SpecialCommand::ListServers => {
                            print_servers(&host.list_servers().await);
                            continue;
                        }
                        SpecialCommand::Clear => {
                            orchestrator.reset().await;
                            println!("{}", "Conversation cleared.".yellow());
                            continue;
                        }
                        SpecialCommand::Help => {
                            print_help();
                            continue;
                        }
                        SpecialCommand::None => {}
                    }

                    run_cancellable_turn(&orchestrator, trimmed).await;
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    async fn print_welcome_banner(host: &HostContext) {
        let config = host.config();
        let servers = host.list_servers().await;
        let ready = servers
            .iter()
            .filter(|s| s.state == SessionState::Ready)
            .count();

        println!("\n{}", "mcphost interactive chat".bold());
        println!(
            "Model:   {} ({})",
            config.llm_provider.model.cyan(),
            config.llm_provider.provider_type
        );
        println!(
            "Servers: {} of {} ready, {} tools\n",
            ready,
            servers.len(),
            host.list_tools().await.len()
        );
        for server in servers.iter().filter(|s| s.state != SessionState::Ready) {
            println!(
                "{}",
                format!(
                    "Server `{}` is {}: {}",
                    server.id,
                    server.state,
                    server.error.as_deref().unwrap_or("unknown error")
                )
                .yellow()
            );
        }
        println!("Type 'help' for available commands, 'exit' to quit\n");
    }
}

/// Run one prompt and print the answer
///
/// # Errors
///
/// Returns the turn error (adapter failure, completion timeout).
pub async fn run_prompt(host: &HostContext, prompt: &str) -> Result<()> {
    let orchestrator = host.orchestrator();
    let outcome = orchestrator
        .run_turn(prompt, &ctrl_c_token())
        .await?;
    print_outcome(&outcome);
    Ok(())
}

/// Run a turn that Ctrl-C cancels, printing the outcome or the error
async fn run_cancellable_turn(orchestrator: &Orchestrator, input: &str) {
    let cancel = ctrl_c_token();
    let result = orchestrator.run_turn(input, &cancel).await;
    // Stop the Ctrl-C listener so the next prompt gets the signal.
    cancel.cancel();

    match result {
        Ok(outcome) => print_outcome(&outcome),
        Err(e) => eprintln!("{}\n", format!("Error: {}", e).red()),
    }
}

/// A token cancelled by the next Ctrl-C, or by cancelling it directly
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let listener = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = listener.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    tracing::debug!("Ctrl-C received, cancelling turn");
                    listener.cancel();
                }
            }
        }
    });
    cancel
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Done(text) => println!("\n{}\n", text),
        TurnOutcome::Exhausted(text) => println!("\n{}\n", text.yellow()),
        TurnOutcome::Cancelled => println!("{}", "Cancelled.".yellow()),
    }
}

/// Print the tool catalog as a table
pub fn print_tools(tools: &[ToolDescriptor]) {
    if tools.is_empty() {
        println!("{}", "No tools available.".yellow());
        return;
    }
    println!("\nAvailable tools:");
    tools_table(tools).printstd();
    println!();
}

/// Print server statuses as a table
pub fn print_servers(servers: &[ServerStatus]) {
    if servers.is_empty() {
        println!("{}", "No MCP servers configured.".yellow());
        return;
    }
    println!("\nMCP servers:");
    servers_table(servers).printstd();
    println!();
}

fn tools_table(tools: &[ToolDescriptor]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Tool".bold(), "Server".bold(), "Description".bold()]);

    for tool in tools {
        let name = if tool.name == tool.original_name {
            tool.name.clone()
        } else {
            format!("{} ({})", tool.name, tool.original_name)
        };
        table.add_row(row![
            name.cyan(),
            tool.owner_session_id,
            truncate(&tool.description, 60)
        ]);
    }
    table
}

fn servers_table(servers: &[ServerStatus]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Server".bold(),
        "Transport".bold(),
        "State".bold(),
        "Tools".bold(),
        "Error".bold()
    ]);

    for server in servers {
        let state = match server.state {
            SessionState::Ready => server.state.to_string().green(),
            SessionState::Connecting => server.state.to_string().yellow(),
            SessionState::Closed | SessionState::Failed => server.state.to_string().red(),
        };
        table.add_row(row![
            server.id,
            server.kind,
            state,
            server.tool_count,
            server.error.as_deref().unwrap_or("-")
        ]);
    }
    table
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", head)
}
