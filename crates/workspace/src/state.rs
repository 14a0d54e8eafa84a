//! Named, permissioned, schema-validated value containers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use statehive_core::{Observers, StateError, Subscription};
use statehive_script::StateBinding;

use crate::schema::Schema;

/// How a state is exposed to scripts. Components can always mutate their own
/// states directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Rendered for the model, never bound in the script sandbox
    ReadOnly,
    WriteOnly,
    ReadAndWrite,
}

impl Permission {
    /// Whether scripts get a binding for states with this permission.
    pub fn is_writable(self) -> bool {
        matches!(self, Permission::WriteOnly | Permission::ReadAndWrite)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReadOnly => "READ_ONLY",
            Permission::WriteOnly => "WRITE_ONLY",
            Permission::ReadAndWrite => "READ_AND_WRITE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published to a state's subscribers after every successful `set`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub name: String,
    pub previous: Value,
    pub current: Value,
}

/// An observable value container.
///
/// `set` validates against the schema, stores the value, releases the lock
/// and then notifies subscribers synchronously on the caller's stack. Script
/// assignments reach the same `set`, so subscribers cannot tell them apart
/// from direct mutations.
pub struct State {
    name: String,
    permission: Permission,
    schema: Schema,
    side_effects: Option<String>,
    value: RwLock<Value>,
    observers: Observers<StateChange>,
}

impl State {
    /// Create a state. The initial value must satisfy `schema`.
    pub fn new(
        name: impl Into<String>,
        permission: Permission,
        schema: Schema,
        initial: Value,
    ) -> Result<Self, StateError> {
        let name = name.into();
        check(&name, &schema, &initial)?;
        Ok(Self {
            name,
            permission,
            schema,
            side_effects: None,
            value: RwLock::new(initial),
            observers: Observers::new(),
        })
    }

    /// Describe what happens outside the workspace when this state changes.
    pub fn with_side_effects(mut self, description: impl Into<String>) -> Self {
        self.side_effects = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn side_effects(&self) -> Option<&str> {
        self.side_effects.as_deref()
    }

    pub fn get(&self) -> Value {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and store `value`, then notify subscribers.
    pub fn set(&self, value: Value) -> Result<(), StateError> {
        check(&self.name, &self.schema, &value)?;
        let previous = {
            let mut guard = self.value.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, value.clone())
        };
        tracing::debug!(state = %self.name, "State updated");
        self.observers.notify(&StateChange {
            name: self.name.clone(),
            previous,
            current: value,
        });
        Ok(())
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(callback)
    }
}

fn check(name: &str, schema: &Schema, value: &Value) -> Result<(), StateError> {
    schema
        .validate(value)
        .map_err(|m| StateError::SchemaViolation {
            state: name.to_string(),
            path: m.path,
            expected: m.expected,
            found: m.found,
        })
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("permission", &self.permission)
            .field("schema", &self.schema.to_string())
            .field("value", &self.get())
            .finish()
    }
}

impl StateBinding for State {
    fn get(&self) -> Value {
        State::get(self)
    }

    fn set(&self, value: Value) -> Result<(), String> {
        if !self.permission.is_writable() {
            return Err(StateError::ReadOnly {
                state: self.name.clone(),
            }
            .to_string());
        }
        State::set(self, value).map_err(|e| e.to_string())
    }
}
