//! Per-turn failures of the request loop.
//!
//! Tool failures are not here: the dispatcher turns them into tool-result
//! payloads and the loop carries on. An `AgentError` fails the whole turn
//! and goes through the orchestrator's error handler, which either
//! re-pushes the turn or aborts.

use statehive_core::ModelError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("The model returned an empty response")]
    NoApiResponse,

    #[error("The model replied without calling a tool")]
    NoToolsUsed,

    #[error("Aborting after {limit} consecutive mistakes")]
    ConsecutiveMistakeLimit { limit: u32 },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    #[error("Cannot start an agent that is {status}")]
    InvalidState { status: String },
}

impl AgentError {
    /// Errors that abort the run immediately, whatever the retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AgentError::ConsecutiveMistakeLimit { .. } | AgentError::InvalidState { .. }
        )
    }

    /// Errors that count toward the consecutive-mistake circuit breaker.
    pub fn is_mistake(&self) -> bool {
        matches!(
            self,
            AgentError::NoToolsUsed | AgentError::InvalidToolArguments(_)
        )
    }
}
