//! Error types for the Statehive domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; crates further out wrap
//! them with `#[from]` (`AgentError::Model`, `ComponentError::State`).

use thiserror::Error;

// --- Bounded context errors ---

/// Failures reported by a [`crate::ModelClient`].
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Failures of a single tool call. These never abort the agent loop; the
/// dispatcher turns them into tool-result payloads.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("No completion callback registered")]
    NoCompletionCallback,
}

/// Failures when declaring or mutating a state container.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("State '{state}' rejected value at {path}: expected {expected}, found {found}")]
    SchemaViolation {
        state: String,
        path: String,
        expected: String,
        found: String,
    },

    #[error("State '{state}' is read-only")]
    ReadOnly { state: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_displays_correctly() {
        let err = ModelError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn timeout_mentions_budget() {
        let err = ModelError::Timeout { timeout_ms: 1500 };
        assert_eq!(err.to_string(), "Request timed out after 1500ms");
    }

    #[test]
    fn schema_violation_displays_path() {
        let err = StateError::SchemaViolation {
            state: "todos".into(),
            path: "$[0].done".into(),
            expected: "boolean".into(),
            found: "string".into(),
        };
        let text = err.to_string();
        assert!(text.contains("todos"));
        assert!(text.contains("$[0].done"));
        assert!(text.contains("boolean"));
    }

    #[test]
    fn missing_callback_message() {
        assert_eq!(
            ToolError::NoCompletionCallback.to_string(),
            "No completion callback registered"
        );
    }
}
