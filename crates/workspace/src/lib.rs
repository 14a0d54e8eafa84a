//! # Statehive Workspace
//!
//! Typed states, the components that own them, and the workspace that
//! renders components for the model and executes its scripts.
//!
//! ```ignore
//! let workspace = Workspace::new("demo", "A counter");
//! workspace.register_component(ComponentRegistration::new("counter", counter))?;
//! let result = workspace.execute_script("count.value = 5").await;
//! assert!(result.success);
//! ```

pub mod component;
pub mod error;
pub mod render;
pub mod runtime;
pub mod schema;
pub mod state;
pub mod workspace;

pub use component::{Component, StatefulComponent, StatefulComponentBuilder, Utility};
pub use error::ComponentError;
pub use runtime::{
    CompletionCallback, ExecutionMetadata, MergedStateEntry, ScriptRuntime,
    WorkspaceScriptExecutionResult,
};
pub use schema::{Schema, SchemaMismatch};
pub use state::{Permission, State, StateChange};
pub use workspace::{ComponentRegistration, Workspace};
