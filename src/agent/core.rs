//! Orchestration loop
//!
//! This module drives one user turn to completion:
//! - Appends the user message and asks the model for a completion
//! - Dispatches requested tool calls through the catalog and feeds the
//!   results back, one tool message per call
//! - Stops on a final answer, the iteration cap, or cancellation

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OrchestrationConfig;
use crate::error::{McpHostError, Result};
use crate::providers::{CompletionParams, Message, ModelAdapter, Response, ToolCall};
use crate::tools::{ToolCatalog, ToolInvocation, ToolResult};

use super::ConversationStore;

/// Longest tool-output excerpt quoted when the model answers with nothing
const FALLBACK_EXCERPT_CHARS: usize = 500;

const CLARIFICATION_TEXT: &str =
    "I wasn't able to produce an answer. Could you rephrase the question or add more detail?";

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final answer
    Done(String),
    /// The iteration cap was hit; carries the explanation shown to the user
    Exhausted(String),
    /// The caller aborted the turn
    Cancelled,
}

impl TurnOutcome {
    /// Text to show the user, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            TurnOutcome::Done(text) | TurnOutcome::Exhausted(text) => Some(text),
            TurnOutcome::Cancelled => None,
        }
    }
}

/// Limits applied to each turn
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Maximum model completions per turn
    pub max_iterations: usize,
    /// Per-call timeout override; `None` uses each session's own timeout
    pub tool_timeout: Option<Duration>,
    /// Bound on a single model completion
    pub completion_timeout: Duration,
    /// Dispatch the calls of one response concurrently
    pub parallel_tool_calls: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestrationConfig::default())
    }
}

impl From<&OrchestrationConfig> for OrchestratorSettings {
    fn from(config: &OrchestrationConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tool_timeout: None,
            completion_timeout: config.completion_timeout(),
            parallel_tool_calls: config.parallel_tool_calls,
        }
    }
}

/// Drives user turns against a model adapter and a tool catalog
///
/// One orchestrator serves one conversation. Turns must not overlap; the
/// conversation window and the catalog are the only shared state and both
/// sit behind read/write locks that are never held across a model or tool
/// call.
///
/// # Examples
///
/// ```ignore
/// use mcphost::agent::{ConversationStore, Orchestrator, OrchestratorSettings, TurnOutcome};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(adapter: std::sync::Arc<dyn mcphost::providers::ModelAdapter>,
/// #                  catalog: std::sync::Arc<mcphost::tools::ToolCatalog>) -> mcphost::error::Result<()> {
/// let orchestrator = Orchestrator::new(
///     adapter,
///     catalog,
///     ConversationStore::new(10),
///     OrchestratorSettings::default(),
///     Default::default(),
/// );
/// if let TurnOutcome::Done(answer) = orchestrator
///     .run_turn("What's the weather in Paris?", &CancellationToken::new())
///     .await?
/// {
///     println!("{answer}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    adapter: Arc<dyn ModelAdapter>,
    catalog: Arc<ToolCatalog>,
    conversation: Arc<RwLock<ConversationStore>>,
    settings: OrchestratorSettings,
    params: CompletionParams,
}

impl Orchestrator {
    /// Creates a new orchestrator
    ///
    /// # Arguments
    ///
    /// * `adapter` - Model backend
    /// * `catalog` - Shared tool catalog
    /// * `conversation` - Initial conversation window
    /// * `settings` - Per-turn limits
    /// * `params` - Sampling parameters forwarded to the adapter
    pub fn new(
        adapter: Arc<dyn ModelAdapter>,
        catalog: Arc<ToolCatalog>,
        conversation: ConversationStore,
        settings: OrchestratorSettings,
        params: CompletionParams,
    ) -> Self {
        Self {
            adapter,
            catalog,
            conversation: Arc::new(RwLock::new(conversation)),
            settings,
            params,
        }
    }

    /// Run one user turn to completion
    ///
    /// # Arguments
    ///
    /// * `input` - The user's message
    /// * `cancel` - Aborts the turn; results already appended stay
    ///
    /// # Errors
    ///
    /// - [`McpHostError::AdapterProtocol`] or [`McpHostError::Provider`] if
    ///   the model backend fails.
    /// - [`McpHostError::CompletionTimeout`] if a completion takes too long.
    ///
    /// Tool failures never surface here; they become tool messages.
    pub async fn run_turn(
        &self,
        input: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let max_iterations = self.settings.max_iterations;
        self.conversation.write().await.append(Message::user(input));

        let mut last_result: Option<ToolResult> = None;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return Ok(TurnOutcome::Cancelled);
            }

            let snapshot = self.conversation.read().await.snapshot();
            let tools = self.catalog.descriptors().await;
            debug!(
                "Iteration {}/{}: {} messages, {} tools",
                iteration,
                max_iterations,
                snapshot.len(),
                tools.len()
            );

            let completion = tokio::time::timeout(
                self.settings.completion_timeout,
                self.adapter.complete(&snapshot, &tools, &self.params),
            );
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
                outcome = completion => match outcome {
                    Ok(response) => response?,
                    Err(_) => {
                        warn!("Model completion exceeded {:?}", self.settings.completion_timeout);
                        return Err(McpHostError::CompletionTimeout(self.settings.completion_timeout).into());
                    }
                },
            };

            let (calls, text) = match response {
                Response::ToolCallsRequested { calls, text } if !calls.is_empty() => {
                    (calls, text)
                }
                Response::ToolCallsRequested { text, .. } => {
                    let text = text.unwrap_or_default();
                    return Ok(self.finish(text, last_result.as_ref()).await);
                }
                Response::FinalText(text) => {
                    return Ok(self.finish(text, last_result.as_ref()).await);
                }
            };

            debug!("Model requested {} tool calls", calls.len());
            self.conversation
                .write()
                .await
                .append(Message::assistant_with_tools(calls.clone()).with_content(text));

            let (results, cancelled) = if self.settings.parallel_tool_calls {
                self.dispatch_concurrent(calls, cancel).await
            } else {
                self.dispatch_sequential(calls, cancel).await
            };
            if let Some(last) = results {
                last_result = Some(last);
            }
            if cancelled {
                info!("Turn cancelled during tool dispatch");
                return Ok(TurnOutcome::Cancelled);
            }
        }

        let message = format!(
            "I've reached the maximum number of tool interactions ({}).",
            max_iterations
        );
        warn!("Turn exhausted after {} iterations", max_iterations);
        self.conversation
            .write()
            .await
            .append(Message::assistant(message.clone()));
        Ok(TurnOutcome::Exhausted(message))
    }

    async fn finish(&self, text: String, last_result: Option<&ToolResult>) -> TurnOutcome {
        let text = if text.trim().is_empty() {
            debug!("Model returned an empty answer, substituting fallback text");
            fallback_text(last_result)
        } else {
            text
        };
        self.conversation
            .write()
            .await
            .append(Message::assistant(text.clone()));
        TurnOutcome::Done(text)
    }

    /// Dispatch calls one at a time, appending each result as it lands
    ///
    /// Returns the last appended result and whether the turn was cancelled.
    async fn dispatch_sequential(
        &self,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> (Option<ToolResult>, bool) {
        let mut last = None;
        for call in calls {
            if cancel.is_cancelled() {
                return (last, true);
            }
            let invocation = ToolInvocation::new(call.id, call.name, call.arguments);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return (last, true),
                result = self.dispatch_one(&invocation) => result,
            };
            self.append_result(&result).await;
            last = Some(result);
        }
        (last, false)
    }

    /// Dispatch all calls at once, then append results in call order
    ///
    /// A failing call does not cancel the others. On cancellation the
    /// results that already arrived are appended.
    async fn dispatch_concurrent(
        &self,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> (Option<ToolResult>, bool) {
        let invocations: Vec<ToolInvocation> = calls
            .into_iter()
            .map(|call| ToolInvocation::new(call.id, call.name, call.arguments))
            .collect();

        let mut slots: Vec<Option<ToolResult>> = vec![None; invocations.len()];
        let mut pending: FuturesUnordered<_> = invocations
            .iter()
            .enumerate()
            .map(|(index, invocation)| async move { (index, self.dispatch_one(invocation).await) })
            .collect();

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = pending.next() => match next {
                    Some((index, result)) => slots[index] = Some(result),
                    None => break,
                },
            }
        }
        drop(pending);

        let mut last = None;
        for result in slots.into_iter().flatten() {
            self.append_result(&result).await;
            last = Some(result);
        }
        (last, cancelled)
    }

    async fn dispatch_one(&self, invocation: &ToolInvocation) -> ToolResult {
        debug!(
            "Calling tool `{}` (call {}, issued {})",
            invocation.tool_name, invocation.call_id, invocation.issued_at
        );
        let outcome = self
            .catalog
            .dispatch(
                &invocation.tool_name,
                invocation.arguments.clone(),
                self.settings.tool_timeout,
            )
            .await;
        let result = ToolResult::from_dispatch(invocation, outcome);
        if let crate::tools::ToolOutcome::Error(failure) = &result.outcome {
            warn!(
                "Tool `{}` failed ({}): {}",
                invocation.tool_name, failure.kind, failure.message
            );
        }
        result
    }

    async fn append_result(&self, result: &ToolResult) {
        self.conversation
            .write()
            .await
            .append(Message::tool_result(result.clone()));
    }

    /// Ordered copy of the conversation window
    pub async fn snapshot(&self) -> Vec<Message> {
        self.conversation.read().await.snapshot()
    }

    /// Clear the conversation, keeping the pinned system message
    pub async fn reset(&self) {
        self.conversation.write().await.reset();
    }

    /// The shared tool catalog
    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Per-turn limits
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }
}

fn fallback_text(last_result: Option<&ToolResult>) -> String {
    match last_result {
        Some(result) => {
            let excerpt: String = result
                .to_content()
                .chars()
                .take(FALLBACK_EXCERPT_CHARS)
                .collect();
            format!(
                "I retrieved the following information using the `{}` tool:\n\n{}",
                result.tool_name, excerpt
            )
        }
        None => CLARIFICATION_TEXT.to_string(),
    }
}
