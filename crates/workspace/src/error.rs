//! Errors raised while declaring or registering components.

use statehive_core::StateError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComponentError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("Component '{component}' declares state '{state}' more than once")]
    DuplicateState { component: String, state: String },

    #[error("Component '{component}' failed to initialize: {reason}")]
    InitFailed { component: String, reason: String },
}
