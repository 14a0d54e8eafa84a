//! Model client trait: the abstraction over LLM backends.
//!
//! The orchestrator never talks to a provider directly. It builds a
//! [`ModelRequest`] (system prompt, rendered workspace, conversation memory,
//! timeout and tool specs) and hands it to whatever [`ModelClient`] was
//! injected. Transport, authentication and prompt templating live behind
//! this seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::tool::{ToolCallWire, ToolSpec};

/// Timeout budget for a single model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub timeout_ms: u64,
}

impl TimeoutConfig {
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
        }
    }
}

/// Everything a model client needs for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Instructions for the model
    pub system_prompt: String,

    /// Rendered workspace, including the script guide
    pub workspace_context: String,

    /// Conversation transcript plus the pending request
    pub memory_context: String,

    /// Timeout budget for this call
    pub timeout: TimeoutConfig,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Add another usage record to this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A complete response from a model client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Tool calls in the order the model emitted them
    #[serde(default)]
    pub tool_calls: Vec<ToolCallWire>,

    /// Free text emitted alongside (or instead of) tool calls
    #[serde(default)]
    pub text_response: Option<String>,

    /// Wall-clock time the request took
    #[serde(default)]
    pub request_time_ms: u64,

    /// Token usage statistics
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl ModelResponse {
    /// True when the reply carries neither tool calls nor non-blank text.
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty()
            && self
                .text_response
                .as_deref()
                .is_none_or(|t| t.trim().is_empty())
    }
}

/// The contract with the model provider.
///
/// Implementations must be cancellation-safe: the orchestrator races
/// `make_request` against its timeout and drops the future if it loses.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "mock").
    fn name(&self) -> &str;

    /// Send one request and wait for the complete reply.
    async fn make_request(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_two_minutes() {
        let timeout = TimeoutConfig::default();
        assert_eq!(timeout.as_duration().as_secs(), 120);
    }

    #[test]
    fn blank_text_counts_as_empty() {
        let response = ModelResponse {
            text_response: Some("   ".into()),
            ..ModelResponse::default()
        };
        assert!(response.is_empty());

        let response = ModelResponse {
            text_response: Some("done".into()),
            ..ModelResponse::default()
        };
        assert!(!response.is_empty());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.accumulate(&TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.prompt_tokens, 11);
    }
}
