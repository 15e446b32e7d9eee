//! Stdio transport for MCP child-process servers
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and communicates with it over its stdin/stdout pipes using
//! newline-delimited JSON framing.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by a newline (`\n`).
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line (newline stripped, blank lines skipped).
//! - The child's stderr is forwarded to a diagnostic stream. It is never
//!   treated as an error condition.
//!
//! # Lifecycle
//!
//! [`StdioTransport::spawn`] starts three background Tokio tasks: a stdin
//! writer, a stdout reader, and a stderr reader. [`Transport::close`] closes
//! stdin, waits for the child to exit, and escalates to SIGTERM and then
//! SIGKILL if it does not. When the [`StdioTransport`] is dropped, a
//! best-effort SIGTERM (Unix) or `start_kill` (non-Unix) is sent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{McpHostError, Result};
use crate::mcp::transport::{Transport, TransportKind};

/// Time the child gets to exit after its stdin is closed.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Time the child gets to exit after SIGTERM before it is killed.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcphost::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(
///     "uvx",
///     &["mcp-server-time".to_string()],
///     &HashMap::new(),
///     None,
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Sender side of the stdin channel; taken on close.
    stdin_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Shared receiver for stdout lines (one JSON message per line).
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Shared receiver for stderr lines (diagnostics only).
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Handle to the spawned child process.
    child: Arc<Mutex<Child>>,
    /// Set when the stdout pipe broke rather than reaching EOF.
    failure: Arc<std::sync::Mutex<Option<String>>>,
    /// Program name, for diagnostics.
    program: String,
}

impl StdioTransport {
    /// Spawn a child process and wire up stdio pipes.
    ///
    /// The child inherits the parent environment with `env` applied on top.
    /// If `working_dir` is `Some`, the child's working directory is set
    /// accordingly.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Transport`] if the process cannot be spawned
    /// or if the stdio pipes are unavailable.
    pub fn spawn(
        program: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.envs(env);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpHostError::Transport(format!("failed to spawn MCP server `{}`: {}", program, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpHostError::Transport("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpHostError::Transport("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpHostError::Transport("child stderr unavailable after spawn".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();
        let failure = Arc::new(std::sync::Mutex::new(None));

        // stdin_rx -> child stdin. Exiting drops the pipe, which the child
        // sees as EOF.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let read_failure = Arc::clone(&failure);
        let name = program.to_string();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if stdout_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("MCP server `{}` closed stdout", name);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Reading stdout of MCP server `{}` failed: {}", name, e);
                        if let Ok(mut slot) = read_failure.lock() {
                            *slot = Some(format!("stdout read failed: {}", e));
                        }
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            stdin_tx: std::sync::Mutex::new(Some(stdin_tx)),
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Arc::new(Mutex::new(child)),
            failure,
            program: program.to_string(),
        })
    }

    fn stdin_sender(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.stdin_tx.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: String) -> Result<()> {
        let tx = self
            .stdin_sender()
            .ok_or_else(|| McpHostError::Transport("stdio transport is closed".to_string()))?;
        tx.send(message).map_err(|e| {
            McpHostError::Transport(format!("stdin channel closed: {}", e)).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stdout_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stderr_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// Close stdin and wait for the child, escalating to SIGTERM and then
    /// SIGKILL.
    async fn close(&self) -> Result<()> {
        if let Ok(mut guard) = self.stdin_tx.lock() {
            guard.take();
        }

        let mut child = self.child.lock().await;
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }

        if let Ok(status) = tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, child.wait()).await {
            tracing::debug!("MCP server `{}` exited: {:?}", self.program, status);
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                tracing::debug!("Sending SIGTERM to MCP server `{}`", self.program);
                // SAFETY: pid is a live child process ID obtained from tokio::process::Child.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
            if tokio::time::timeout(TERMINATE_TIMEOUT, child.wait())
                .await
                .is_ok()
            {
                return Ok(());
            }
        }

        tracing::warn!("Killing unresponsive MCP server `{}`", self.program);
        child.kill().await.map_err(|e| {
            McpHostError::Transport(format!("failed to kill `{}`: {}", self.program, e))
        })?;
        Ok(())
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of the child process on drop.
    ///
    /// This method never blocks. If the child lock is held elsewhere the
    /// kill is skipped.
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.try_lock() {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
        }
    }
}
