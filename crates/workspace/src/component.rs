//! The component contract and a reusable builder-based implementation.
//!
//! A component is the unit a feature author registers with a workspace: a
//! named bundle of [`State`]s, optional script utilities, optional extra
//! tools and a renderer.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use statehive_core::{StateError, ToolError, ToolSpec};
use statehive_script::{FnFunction, ScriptFunction};

use crate::error::ComponentError;
use crate::render;
use crate::state::State;

/// A helper function callable from scripts under `name`.
#[derive(Clone)]
pub struct Utility {
    pub name: String,
    pub description: String,
    pub function: Arc<dyn ScriptFunction>,
}

impl Utility {
    /// A synchronous utility.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        f: impl Fn(Vec<Value>) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self::from_function(name, description, Arc::new(FnFunction::new(f)))
    }

    /// A utility backed by any [`ScriptFunction`], including ones that
    /// suspend.
    pub fn from_function(
        name: impl Into<String>,
        description: impl Into<String>,
        function: Arc<dyn ScriptFunction>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            function,
        }
    }
}

impl std::fmt::Debug for Utility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Utility").field("name", &self.name).finish()
    }
}

/// What a workspace needs from a registered component.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Called by the workspace once per registration, before the script
    /// runtime is rebuilt. Components that declare states lazily do so here.
    fn init(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// The component's states, in declaration order.
    fn states(&self) -> Vec<Arc<State>>;

    fn utilities(&self) -> Vec<Utility> {
        Vec::new()
    }

    /// Extra tools offered to the model besides the script tools.
    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    /// Handle a call to one of the tools returned by [`Component::tools`].
    async fn handle_tool_call(&self, name: &str, _params: Value) -> Result<Value, ToolError> {
        Err(ToolError::NotFound(name.to_string()))
    }

    fn render(&self, wrap_width: usize) -> String {
        render::render_component(self.name(), self.description(), &self.states(), wrap_width)
    }
}

type InitHook = Box<dyn Fn() -> Result<Vec<State>, StateError> + Send + Sync>;
type ToolHandler = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// A component assembled from parts.
///
/// ```ignore
/// let counter = StatefulComponent::builder("counter")
///     .description("A single counter")
///     .state(State::new("count", Permission::ReadAndWrite, Schema::Integer, json!(0))?)
///     .build()?;
/// ```
pub struct StatefulComponent {
    name: String,
    description: String,
    states: RwLock<Vec<Arc<State>>>,
    init_hook: Option<InitHook>,
    initialized: AtomicBool,
    utilities: Vec<Utility>,
    tools: Vec<(ToolSpec, ToolHandler)>,
}

impl StatefulComponent {
    pub fn builder(name: impl Into<String>) -> StatefulComponentBuilder {
        StatefulComponentBuilder {
            name: name.into(),
            description: String::new(),
            states: Vec::new(),
            init_hook: None,
            utilities: Vec::new(),
            tools: Vec::new(),
        }
    }

    /// Look up one of this component's states by name.
    pub fn state(&self, name: &str) -> Option<Arc<State>> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }
}

#[async_trait]
impl Component for StatefulComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn init(&self) -> Result<(), ComponentError> {
        let Some(hook) = &self.init_hook else {
            return Ok(());
        };
        // The write lock is held through the hook so concurrent callers see
        // either no declared states or all of them.
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let declared = hook().map_err(|e| ComponentError::InitFailed {
            component: self.name.clone(),
            reason: e.to_string(),
        })?;

        let mut all: Vec<Arc<State>> = states.clone();
        all.extend(declared.into_iter().map(Arc::new));
        ensure_unique(&self.name, &all)?;
        *states = all;
        self.initialized.store(true, Ordering::Release);
        tracing::debug!(component = %self.name, states = states.len(), "Component initialized");
        Ok(())
    }

    fn states(&self) -> Vec<Arc<State>> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn utilities(&self) -> Vec<Utility> {
        self.utilities.clone()
    }

    fn tools(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|(spec, _)| spec.clone()).collect()
    }

    async fn handle_tool_call(&self, name: &str, params: Value) -> Result<Value, ToolError> {
        let (_, handler) = self
            .tools
            .iter()
            .find(|(spec, _)| spec.name() == name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        handler(params)
    }
}

fn ensure_unique(component: &str, states: &[Arc<State>]) -> Result<(), ComponentError> {
    let mut seen = HashSet::new();
    for state in states {
        if !seen.insert(state.name()) {
            return Err(ComponentError::DuplicateState {
                component: component.to_string(),
                state: state.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Builder for [`StatefulComponent`].
pub struct StatefulComponentBuilder {
    name: String,
    description: String,
    states: Vec<Arc<State>>,
    init_hook: Option<InitHook>,
    utilities: Vec<Utility>,
    tools: Vec<(ToolSpec, ToolHandler)>,
}

impl StatefulComponentBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.states.push(Arc::new(state));
        self
    }

    /// Share a state handle the caller keeps a reference to.
    pub fn shared_state(mut self, state: Arc<State>) -> Self {
        self.states.push(state);
        self
    }

    /// Declare states lazily, when the component is first registered.
    pub fn init_with(
        mut self,
        hook: impl Fn() -> Result<Vec<State>, StateError> + Send + Sync + 'static,
    ) -> Self {
        self.init_hook = Some(Box::new(hook));
        self
    }

    pub fn utility(mut self, utility: Utility) -> Self {
        self.utilities.push(utility);
        self
    }

    pub fn tool(
        mut self,
        spec: ToolSpec,
        handler: impl Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    ) -> Self {
        self.tools.push((spec, Arc::new(handler)));
        self
    }

    pub fn build(self) -> Result<StatefulComponent, ComponentError> {
        ensure_unique(&self.name, &self.states)?;
        Ok(StatefulComponent {
            name: self.name,
            description: self.description,
            states: RwLock::new(self.states),
            init_hook: self.init_hook,
            initialized: AtomicBool::new(false),
            utilities: self.utilities,
            tools: self.tools,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::state::Permission;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn count_state(initial: i64) -> State {
        State::new(
            "count",
            Permission::ReadAndWrite,
            Schema::Integer,
            json!(initial),
        )
        .unwrap()
    }

    #[test]
    fn duplicate_state_names_rejected() {
        let err = StatefulComponent::builder("counter")
            .state(count_state(0))
            .state(count_state(1))
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            ComponentError::DuplicateState {
                component: "counter".into(),
                state: "count".into()
            }
        );
    }

    #[test]
    fn init_declares_states_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let component = StatefulComponent::builder("lazy")
            .init_with(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![count_state(3)])
            })
            .build()
            .unwrap();

        assert!(component.states().is_empty());
        component.init().unwrap();
        component.init().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(component.states().len(), 1);
        assert_eq!(component.state("count").unwrap().get(), json!(3));
    }

    #[test]
    fn concurrent_init_runs_the_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let component = StatefulComponent::builder("lazy")
            .init_with(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                Ok(vec![count_state(3)])
            })
            .build()
            .unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| component.init().unwrap());
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(component.states().len(), 1);
    }

    #[test]
    fn failing_init_reports_component() {
        let component = StatefulComponent::builder("broken")
            .init_with(|| {
                State::new("n", Permission::ReadOnly, Schema::Integer, json!("x")).map(|s| vec![s])
            })
            .build()
            .unwrap();
        let err = component.init().unwrap_err();
        assert!(matches!(err, ComponentError::InitFailed { ref component, .. } if component == "broken"));
    }

    #[tokio::test]
    async fn component_tools_are_dispatched_by_name() {
        let component = StatefulComponent::builder("clock")
            .tool(
                ToolSpec::function("now", "Current tick", json!({"type": "object"})),
                |_| Ok(json!({"tick": 42})),
            )
            .build()
            .unwrap();

        assert_eq!(component.tools()[0].name(), "now");
        assert_eq!(
            component.handle_tool_call("now", json!({})).await.unwrap(),
            json!({"tick": 42})
        );
        assert!(matches!(
            component.handle_tool_call("later", json!({})).await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn utilities_are_callable() {
        let component = StatefulComponent::builder("math")
            .utility(Utility::new("double", "Doubles a number", |args| {
                let n = args.first().and_then(Value::as_f64).ok_or("expected a number")?;
                Ok(json!(n * 2.0))
            }))
            .build()
            .unwrap();
        let utility = &component.utilities()[0];
        assert_eq!(utility.name, "double");
        assert_eq!(utility.function.call(vec![json!(2)]).await.unwrap(), json!(4.0));
    }

    #[test]
    fn default_render_uses_states() {
        let component = StatefulComponent::builder("counter")
            .description("A single counter")
            .state(count_state(7))
            .build()
            .unwrap();
        let text = component.render(20);
        assert!(text.contains("### Component: counter"));
        assert!(text.contains("| value        | 7"));
    }
}
