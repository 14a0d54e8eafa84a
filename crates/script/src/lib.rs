//! Capability-restricted script interpreter for Statehive workspaces.
//!
//! Scripts are written in a small JavaScript-flavoured language. A script
//! can only reach the names bound in its [`Sandbox`] (state bindings and
//! utility functions) plus a fixed builtin allow-list; there is no ambient
//! host access. Execution is metered by a [`SecureExecutionContext`].
//!
//! ```text
//! let open = todos.value.filter(t => !t.done)
//! count.value = open.length
//! return `${open.length} open`
//! ```

pub mod ast;
mod builtins;
mod interpreter;
pub mod lexer;
pub mod parser;
pub mod sandbox;
pub mod value;

pub use interpreter::{ExecutionOutcome, execute};
pub use parser::{DEFAULT_MAX_NESTING_DEPTH, parse, parse_with_depth};
pub use sandbox::{
    ExecutionMeter, ExecutionStats, FnFunction, Sandbox, SandboxPolicy, ScriptFunction,
    SecureExecutionContext, StateBinding,
};

/// Errors raised while validating, parsing or running a script.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("SyntaxError at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("Cannot assign to state '{name}': {reason}")]
    Binding { name: String, reason: String },

    #[error("Utility '{name}' failed: {reason}")]
    Function { name: String, reason: String },

    #[error("Iteration limit of {limit} exceeded")]
    IterationLimit { limit: u64 },

    #[error("Script timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{0}")]
    Validation(String),

    #[error("line {line}: {error}")]
    Runtime {
        line: usize,
        error: Box<ScriptError>,
    },
}

impl ScriptError {
    /// The underlying error, without line information.
    pub fn root(&self) -> &ScriptError {
        match self {
            ScriptError::Runtime { error, .. } => error.root(),
            other => other,
        }
    }

    /// Whether the error came from a resource limit rather than the
    /// script's own logic.
    pub fn is_limit(&self) -> bool {
        matches!(
            self.root(),
            ScriptError::IterationLimit { .. } | ScriptError::Timeout { .. }
        )
    }
}
