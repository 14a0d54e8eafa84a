//! The component registry the model sees.
//!
//! A [`Workspace`] owns its registrations and one [`ScriptRuntime`] built
//! from them. Every `register_component` / `unregister_component` throws
//! the runtime away and merges a fresh one, so the runtime never holds a
//! state that is no longer registered.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use statehive_config::{AppConfig, WorkspaceSettings};
use statehive_core::tool::{ATTEMPT_COMPLETION, EXECUTE_SCRIPT};
use statehive_core::{ToolError, ToolSpec};
use statehive_script::{SandboxPolicy, SecureExecutionContext};

use crate::component::Component;
use crate::error::ComponentError;
use crate::runtime::{CompletionCallback, ScriptRuntime, WorkspaceScriptExecutionResult};

/// A component registered under `key`. Lower priorities render first.
#[derive(Clone)]
pub struct ComponentRegistration {
    pub key: String,
    pub component: Arc<dyn Component>,
    pub priority: i32,
}

impl ComponentRegistration {
    pub fn new(key: impl Into<String>, component: Arc<dyn Component>) -> Self {
        Self {
            key: key.into(),
            component,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for ComponentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistration")
            .field("key", &self.key)
            .field("component", &self.component.name())
            .field("priority", &self.priority)
            .finish()
    }
}

struct Registered {
    registration: ComponentRegistration,
    sequence: u64,
}

struct Inner {
    components: HashMap<String, Registered>,
    next_sequence: u64,
    runtime: Arc<ScriptRuntime>,
    on_completion: Option<CompletionCallback>,
}

impl Inner {
    /// Registrations in render order: priority, then registration order.
    fn ordered(&self) -> Vec<&Registered> {
        let mut ordered: Vec<&Registered> = self.components.values().collect();
        ordered.sort_by_key(|r| (r.registration.priority, r.sequence));
        ordered
    }
}

pub struct Workspace {
    id: String,
    name: String,
    description: String,
    settings: WorkspaceSettings,
    context: Arc<dyn SecureExecutionContext>,
    inner: RwLock<Inner>,
}

impl Workspace {
    /// An empty workspace with default settings and the default sandbox policy.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_parts(
            Uuid::new_v4().to_string(),
            name.into(),
            description.into(),
            WorkspaceSettings::default(),
            Arc::new(SandboxPolicy::default()),
        )
    }

    /// An empty workspace configured from `config`.
    pub fn with_config(
        name: impl Into<String>,
        description: impl Into<String>,
        config: &AppConfig,
    ) -> Self {
        Self::with_parts(
            Uuid::new_v4().to_string(),
            name.into(),
            description.into(),
            config.workspace.clone(),
            Arc::new(SandboxPolicy::from_settings(&config.script)),
        )
    }

    /// Use a fixed id instead of a generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the script validation and metering policy.
    pub fn with_context(mut self, context: Arc<dyn SecureExecutionContext>) -> Self {
        self.context = context;
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        rebuild(inner, &self.context);
        self
    }

    fn with_parts(
        id: String,
        name: String,
        description: String,
        settings: WorkspaceSettings,
        context: Arc<dyn SecureExecutionContext>,
    ) -> Self {
        let runtime = Arc::new(ScriptRuntime::build(std::iter::empty(), context.clone()));
        Self {
            id,
            name,
            description,
            settings,
            context,
            inner: RwLock::new(Inner {
                components: HashMap::new(),
                next_sequence: 0,
                runtime,
                on_completion: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Insert or replace the component under `registration.key`.
    ///
    /// The component's `init()` runs first; if it fails nothing is
    /// registered. A replaced key gets a fresh registration sequence.
    pub fn register_component(
        &self,
        registration: ComponentRegistration,
    ) -> Result<(), ComponentError> {
        registration.component.init()?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let key = registration.key.clone();
        let replaced = inner
            .components
            .insert(
                key.clone(),
                Registered {
                    registration,
                    sequence,
                },
            )
            .is_some();
        rebuild(&mut inner, &self.context);
        info!(workspace = %self.name, component = %key, replaced, "Component registered");
        Ok(())
    }

    /// Remove the component under `key`. Returns whether one was registered.
    pub fn unregister_component(&self, key: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.components.remove(key).is_some();
        if removed {
            rebuild(&mut inner, &self.context);
            info!(workspace = %self.name, component = %key, "Component unregistered");
        }
        removed
    }

    pub fn component_count(&self) -> usize {
        self.read().components.len()
    }

    /// The registration under `key`.
    pub fn component(&self, key: &str) -> Option<ComponentRegistration> {
        self.read()
            .components
            .get(key)
            .map(|r| r.registration.clone())
    }

    /// The current runtime. A later registration change replaces it, the
    /// returned handle keeps working against the old merge.
    pub fn runtime(&self) -> Arc<ScriptRuntime> {
        self.read().runtime.clone()
    }

    /// Warnings recorded while merging the current runtime.
    pub fn warnings(&self) -> Vec<String> {
        self.read().runtime.warnings().to_vec()
    }

    /// Banner followed by every component, in priority order.
    pub fn render(&self) -> String {
        let inner = self.read();
        let mut out = format!(
            "# Workspace: {}\nID: {}\nDescription: {}\nComponents: {}\n",
            self.name,
            self.id,
            if self.description.is_empty() {
                "(none)"
            } else {
                self.description.as_str()
            },
            inner.components.len()
        );
        for registered in inner.ordered() {
            out.push('\n');
            out.push_str(
                &registered
                    .registration
                    .component
                    .render(self.settings.value_wrap_width),
            );
        }
        out
    }

    /// [`Workspace::render`] followed by the script guide.
    pub fn render_with_script_section(&self) -> String {
        let mut out = self.render();
        out.push('\n');
        out.push_str(&self.runtime().render_script_section());
        out
    }

    /// `execute_script` and `attempt_completion`.
    pub fn common_tools(&self) -> Vec<ToolSpec> {
        self.runtime().common_tools()
    }

    /// The common tools plus every component-declared tool.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let inner = self.read();
        let mut specs = inner.runtime.common_tools();
        for registered in inner.ordered() {
            specs.extend(registered.registration.component.tools());
        }
        specs
    }

    pub async fn execute_script(&self, script: &str) -> WorkspaceScriptExecutionResult {
        let runtime = self.runtime();
        runtime.execute(script).await
    }

    /// Set the completion callback. It survives runtime rebuilds; a second
    /// call replaces the first.
    pub fn on_completion(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        let callback: CompletionCallback = Arc::new(callback);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.runtime.on_completion(callback.clone());
        inner.on_completion = Some(callback);
    }

    pub fn attempt_completion(&self, result: &str) -> Result<(), ToolError> {
        self.runtime().attempt_completion(result)
    }

    /// Route a model tool call.
    pub async fn handle_tool_call(&self, name: &str, params: Value) -> Result<Value, ToolError> {
        match name {
            EXECUTE_SCRIPT => {
                let script = params
                    .get("script")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ToolError::InvalidArguments(
                            "execute_script requires a 'script' string".into(),
                        )
                    })?;
                let result = self.execute_script(script).await;
                serde_json::to_value(&result).map_err(|e| ToolError::ExecutionFailed {
                    tool_name: name.to_string(),
                    reason: e.to_string(),
                })
            }
            ATTEMPT_COMPLETION => {
                let result = params.get("result").and_then(Value::as_str).unwrap_or("");
                self.attempt_completion(result)?;
                Ok(json!({ "success": true }))
            }
            _ => {
                let component = {
                    let inner = self.read();
                    inner
                        .ordered()
                        .into_iter()
                        .map(|r| r.registration.component.clone())
                        .find(|c| c.tools().iter().any(|t| t.name() == name))
                };
                let component = component.ok_or_else(|| ToolError::NotFound(name.to_string()))?;
                debug!(tool = name, component = component.name(), "Routing component tool");
                component.handle_tool_call(name, params).await
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Merge the registrations in registration order and install the
/// completion callback on the new runtime.
fn rebuild(inner: &mut Inner, context: &Arc<dyn SecureExecutionContext>) {
    let mut by_sequence: Vec<&Registered> = inner.components.values().collect();
    by_sequence.sort_by_key(|r| r.sequence);
    let runtime = ScriptRuntime::build(
        by_sequence
            .iter()
            .map(|r| (r.registration.key.as_str(), &r.registration.component)),
        context.clone(),
    );
    if let Some(callback) = &inner.on_completion {
        runtime.on_completion(callback.clone());
    }
    debug!(
        components = runtime.component_count(),
        states = runtime.state_count(),
        warnings = runtime.warnings().len(),
        "Script runtime rebuilt"
    );
    inner.runtime = Arc::new(runtime);
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("components", &self.component_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::StatefulComponent;
    use crate::schema::Schema;
    use crate::state::{Permission, State};

    fn counter(name: &str, initial: i64) -> Arc<dyn Component> {
        Arc::new(
            StatefulComponent::builder(name)
                .state(
                    State::new(
                        format!("{name}_count"),
                        Permission::ReadAndWrite,
                        Schema::Integer,
                        json!(initial),
                    )
                    .unwrap(),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn banner_lists_identity_and_count() {
        let ws = Workspace::new("demo", "A demo").with_id("ws-1");
        ws.register_component(ComponentRegistration::new("a", counter("a", 0)))
            .unwrap();
        let text = ws.render();
        assert!(text.starts_with(
            "# Workspace: demo\nID: ws-1\nDescription: A demo\nComponents: 1\n"
        ));
        assert!(text.contains("### Component: a"));
    }

    #[test]
    fn render_orders_by_priority_then_registration() {
        let ws = Workspace::new("demo", "");
        ws.register_component(ComponentRegistration::new("late", counter("late", 0)).with_priority(5))
            .unwrap();
        ws.register_component(ComponentRegistration::new("first", counter("first", 0)))
            .unwrap();
        ws.register_component(ComponentRegistration::new("second", counter("second", 0)))
            .unwrap();

        let text = ws.render();
        let first = text.find("Component: first").unwrap();
        let second = text.find("Component: second").unwrap();
        let late = text.find("Component: late").unwrap();
        assert!(first < second && second < late);
    }

    #[test]
    fn re_registration_replaces_without_error() {
        let ws = Workspace::new("demo", "");
        ws.register_component(ComponentRegistration::new("c", counter("a", 1)))
            .unwrap();
        ws.register_component(ComponentRegistration::new("c", counter("b", 2)))
            .unwrap();
        assert_eq!(ws.component_count(), 1);
        assert!(ws.runtime().state("b_count").is_some());
        assert!(ws.runtime().state("a_count").is_none());
    }

    #[test]
    fn unregister_rebuilds() {
        let ws = Workspace::new("demo", "");
        ws.register_component(ComponentRegistration::new("c", counter("c", 1)))
            .unwrap();
        assert!(ws.unregister_component("c"));
        assert!(!ws.unregister_component("c"));
        assert_eq!(ws.runtime().state_count(), 0);
    }

    #[test]
    fn failed_init_registers_nothing() {
        let broken: Arc<dyn Component> = Arc::new(
            StatefulComponent::builder("broken")
                .init_with(|| {
                    State::new("n", Permission::ReadOnly, Schema::Integer, json!(true))
                        .map(|s| vec![s])
                })
                .build()
                .unwrap(),
        );
        let ws = Workspace::new("demo", "");
        assert!(ws
            .register_component(ComponentRegistration::new("broken", broken))
            .is_err());
        assert_eq!(ws.component_count(), 0);
    }

    #[tokio::test]
    async fn execute_script_requires_script_param() {
        let ws = Workspace::new("demo", "");
        let err = ws
            .handle_tool_call(EXECUTE_SCRIPT, json!({"code": "1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = ws.handle_tool_call("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn execute_script_returns_serialized_result() {
        let ws = Workspace::new("demo", "");
        ws.register_component(ComponentRegistration::new("c", counter("c", 1)))
            .unwrap();
        let value = ws
            .handle_tool_call(EXECUTE_SCRIPT, json!({"script": "c_count.value += 1\nreturn c_count.value"}))
            .await
            .unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["output"], json!(2));
        assert_eq!(value["metadata"]["component_count"], json!(1));
    }

    #[tokio::test]
    async fn component_tools_are_routed() {
        let clock: Arc<dyn Component> = Arc::new(
            StatefulComponent::builder("clock")
                .tool(
                    ToolSpec::function("tick", "Advance the clock", json!({"type": "object"})),
                    |_| Ok(json!({"ticked": true})),
                )
                .build()
                .unwrap(),
        );
        let ws = Workspace::new("demo", "");
        ws.register_component(ComponentRegistration::new("clock", clock))
            .unwrap();

        let names: Vec<String> = ws.tool_specs().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec![EXECUTE_SCRIPT, ATTEMPT_COMPLETION, "tick"]);
        assert_eq!(ws.common_tools().len(), 2);
        assert_eq!(
            ws.handle_tool_call("tick", json!({})).await.unwrap(),
            json!({"ticked": true})
        );
    }
}
