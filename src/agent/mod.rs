//! Agent module for mcphost
//!
//! This module contains the conversation window and the orchestration loop
//! that alternates between the model and the tool catalog.

pub mod conversation;
pub mod core;

pub use conversation::ConversationStore;
pub use core::{Orchestrator, OrchestratorSettings, TurnOutcome};
