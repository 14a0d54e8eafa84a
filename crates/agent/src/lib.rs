//! The Statehive request loop.
//!
//! The orchestrator drives a model through a retrying loop:
//!
//! 1. **Render** the workspace and its script guide
//! 2. **Ask** the model client for one tool call
//! 3. **Dispatch** the call: run a script against the merged states, call a
//!    component tool, or signal completion
//! 4. **Record** the assistant message, the tool result and the workspace
//!    snapshot in history
//! 5. **Continue** with a "workspace changed" turn, or stop on completion
//!
//! Failed turns are retried with an error preamble until the per-item retry
//! budget runs out; a consecutive-mistake circuit breaker stops runs where
//! the model keeps failing to act.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod prompt;
pub mod stack;

pub use dispatcher::{DispatchOutcome, ToolDispatcher, ToolExecution, ToolUsage};
pub use error::AgentError;
pub use event::AgentEvent;
pub use orchestrator::{AbortHandle, AgentOrchestrator};
pub use stack::{Sender, StackItem};
