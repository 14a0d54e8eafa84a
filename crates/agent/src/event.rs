//! Events published by the orchestrator.
//!
//! Listeners subscribe through [`crate::AgentOrchestrator::subscribe`] and
//! are called synchronously at the point the event happens.

use serde::{Deserialize, Serialize};
use statehive_core::{AgentStatus, ConversationMessage};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A message was appended to history.
    MessageAdded { message: ConversationMessage },

    /// The lifecycle status changed.
    StatusChanged { from: AgentStatus, to: AgentStatus },

    /// A tool call finished.
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
    },

    /// A turn failed. `retry_attempt` is the attempt that failed.
    ErrorRecorded {
        message: String,
        retry_attempt: u32,
        will_retry: bool,
    },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageAdded { .. } => "message_added",
            Self::StatusChanged { .. } => "status_changed",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::ErrorRecorded { .. } => "error_recorded",
        }
    }
}
