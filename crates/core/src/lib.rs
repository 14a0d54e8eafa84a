//! # Statehive Core
//!
//! Domain types, traits, and error definitions for the Statehive agent runtime.
//! This crate has **zero framework dependencies**. It defines the domain model
//! that the script, workspace, and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! The seams to the outside world are traits defined here:
//! - [`ModelClient`] is the contract with the model provider
//! - [`Observers`] is the synchronous subscription registry used by states
//!   and by the orchestrator
//!
//! Everything else (the workspace, the script sandbox, the request loop)
//! depends inward on these types.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::AgentStatus;
pub use error::{ModelError, StateError, ToolError};
pub use event::{Observers, Subscription};
pub use message::{ContentBlock, ConversationMessage, Role};
pub use provider::{ModelClient, ModelRequest, ModelResponse, TimeoutConfig, TokenUsage};
pub use tool::{FunctionSpec, ToolCallResult, ToolCallWire, ToolSpec};
