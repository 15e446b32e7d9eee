//! Special commands parser for interactive chat mode
//!
//! A handful of words typed on their own are handled by the host instead of
//! being sent to the model:
//! - `exit` / `quit` end the session
//! - `tools` lists the tool catalog
//! - `servers` lists the MCP server states
//! - `clear` resets the conversation
//! - `help` shows this list
//!
//! Commands are case-insensitive and may be written with a leading `/`.

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Print the tool catalog
    ListTools,

    /// Print every configured server with its state
    ListServers,

    /// Reset the conversation, keeping the system prompt
    Clear,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command
    ///
    /// The input should be sent to the model as a regular prompt.
    None,
}

/// Parse a user input line into a special command
///
/// # Examples
///
/// ```
/// use mcphost::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("Quit"), SpecialCommand::Exit);
/// assert_eq!(parse_special_command("/tools"), SpecialCommand::ListTools);
/// assert_eq!(parse_special_command("tools for weather?"), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> SpecialCommand {
    let trimmed = input.trim();
    let word = trimmed.strip_prefix('/').unwrap_or(trimmed).to_lowercase();

    match word.as_str() {
        "exit" | "quit" => SpecialCommand::Exit,
        "tools" => SpecialCommand::ListTools,
        "servers" => SpecialCommand::ListServers,
        "clear" => SpecialCommand::Clear,
        "help" | "?" => SpecialCommand::Help,
        _ => SpecialCommand::None,
    }
}

/// Print the list of special commands
pub fn print_help() {
    println!(
        r#"
Commands
========
  tools     - List the tools offered to the model
  servers   - Show each MCP server and its state
  clear     - Start a fresh conversation
  help      - Show this help
  exit      - Leave the chat (also: quit, Ctrl-D)

Anything else is sent to the model. Press Ctrl-C while an answer is
being produced to cancel it.
"#
    );
}
