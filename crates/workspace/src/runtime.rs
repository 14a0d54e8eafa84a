//! The merged script runtime.
//!
//! A [`ScriptRuntime`] is built from a snapshot of the registered components.
//! It merges their states and utilities into one namespace, builds a fresh
//! sandbox per execution and reports the outcome as a
//! [`WorkspaceScriptExecutionResult`]. The workspace throws the runtime away
//! and builds a new one whenever its registrations change.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use statehive_core::tool::{ATTEMPT_COMPLETION, EXECUTE_SCRIPT};
use statehive_core::{ToolError, ToolSpec};
use statehive_script::{Sandbox, ScriptError, ScriptFunction, SecureExecutionContext, StateBinding};

use crate::component::Component;
use crate::render;
use crate::state::{Permission, State};

/// Called with the `result` text of `attempt_completion`.
pub type CompletionCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One state in the merged namespace.
#[derive(Clone)]
pub struct MergedStateEntry {
    pub name: String,
    pub state: Arc<State>,
    pub permission: Permission,
    pub component_key: String,
}

#[derive(Clone)]
struct MergedUtility {
    description: String,
    function: Arc<dyn ScriptFunction>,
    component_key: String,
}

/// Accounting attached to a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub execution_time_ms: u64,
    pub component_count: usize,
    pub state_count: usize,
    pub iterations: u64,
}

/// Outcome of one `execute_script` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceScriptExecutionResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExecutionMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl WorkspaceScriptExecutionResult {
    fn failure(message: &str, error: String) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            output: None,
            error: Some(error),
            metadata: None,
            logs: Vec::new(),
        }
    }
}

pub struct ScriptRuntime {
    states: BTreeMap<String, MergedStateEntry>,
    utilities: BTreeMap<String, MergedUtility>,
    component_count: usize,
    warnings: Vec<String>,
    context: Arc<dyn SecureExecutionContext>,
    completion: RwLock<Option<CompletionCallback>>,
}

impl ScriptRuntime {
    /// Merge `components`, given in registration order. A later component's
    /// state or utility replaces an earlier one with the same name, and a
    /// warning is recorded.
    pub fn build<'a>(
        components: impl IntoIterator<Item = (&'a str, &'a Arc<dyn Component>)>,
        context: Arc<dyn SecureExecutionContext>,
    ) -> Self {
        let mut states: BTreeMap<String, MergedStateEntry> = BTreeMap::new();
        let mut utilities: BTreeMap<String, MergedUtility> = BTreeMap::new();
        let mut warnings = Vec::new();
        let mut component_count = 0;

        for (key, component) in components {
            component_count += 1;
            for state in component.states() {
                let name = state.name().to_string();
                let entry = MergedStateEntry {
                    name: name.clone(),
                    permission: state.permission(),
                    state,
                    component_key: key.to_string(),
                };
                if let Some(previous) = states.insert(name.clone(), entry) {
                    let message = format!(
                        "State '{name}' from component '{key}' overrides the one from component '{}'",
                        previous.component_key
                    );
                    warn!(state = %name, component = key, previous = %previous.component_key, "Duplicate state name");
                    warnings.push(message);
                }
            }
            for utility in component.utilities() {
                let merged = MergedUtility {
                    description: utility.description,
                    function: utility.function,
                    component_key: key.to_string(),
                };
                if let Some(previous) = utilities.insert(utility.name.clone(), merged) {
                    let message = format!(
                        "Utility '{}' from component '{key}' overrides the one from component '{}'",
                        utility.name, previous.component_key
                    );
                    warn!(utility = %utility.name, component = key, "Duplicate utility name");
                    warnings.push(message);
                }
            }
        }

        for name in utilities.keys() {
            if states.contains_key(name) {
                let message = format!("Utility '{name}' is shadowed by a state of the same name");
                warn!(utility = %name, "Utility shadowed by state");
                warnings.push(message);
            }
        }

        Self {
            states,
            utilities,
            component_count,
            warnings,
            context,
            completion: RwLock::new(None),
        }
    }

    pub fn states(&self) -> impl Iterator<Item = &MergedStateEntry> {
        self.states.values()
    }

    pub fn state(&self, name: &str) -> Option<&MergedStateEntry> {
        self.states.get(name)
    }

    pub fn utility_names(&self) -> impl Iterator<Item = &str> {
        self.utilities.keys().map(String::as_str)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn component_count(&self) -> usize {
        self.component_count
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Bindings for one execution: every writable state and every utility.
    pub fn sandbox(&self) -> Sandbox {
        let mut sandbox = Sandbox::new();
        for (name, utility) in &self.utilities {
            sandbox.bind_function(name.clone(), Arc::clone(&utility.function));
        }
        for entry in self.states.values() {
            if entry.permission.is_writable() {
                let binding: Arc<dyn StateBinding> = entry.state.clone();
                sandbox.bind_state(entry.name.clone(), binding);
            }
        }
        sandbox
    }

    /// Validate and run `script` against the merged states.
    pub async fn execute(&self, script: &str) -> WorkspaceScriptExecutionResult {
        let mut errors = self.context.validate(script);
        let program = if errors.is_empty() {
            match statehive_script::parse_with_depth(script, self.context.max_nesting_depth()) {
                Ok(program) => Some(program),
                Err(e) => {
                    errors.push(e.to_string());
                    None
                }
            }
        } else {
            None
        };
        let Some(program) = program else {
            info!(errors = errors.len(), "Script rejected");
            return WorkspaceScriptExecutionResult::failure(
                "Script validation failed",
                errors.join("\n"),
            );
        };

        let sandbox = self.sandbox();
        let meter = self.context.begin();
        let timeout = self.context.timeout();
        let outcome = tokio::time::timeout(
            timeout,
            statehive_script::execute(&program, &sandbox, &meter),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ScriptError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        });
        let stats = meter.finish();

        match outcome {
            Ok(outcome) => {
                info!(
                    elapsed_ms = stats.elapsed_ms,
                    iterations = stats.iterations,
                    "Script executed"
                );
                WorkspaceScriptExecutionResult {
                    success: true,
                    message: "Script executed successfully".into(),
                    output: Some(outcome.value),
                    error: None,
                    metadata: Some(ExecutionMetadata {
                        execution_time_ms: stats.elapsed_ms,
                        component_count: self.component_count,
                        state_count: self.states.len(),
                        iterations: stats.iterations,
                    }),
                    logs: outcome.logs,
                }
            }
            Err(e) => {
                info!(error = %e, elapsed_ms = stats.elapsed_ms, "Script failed");
                WorkspaceScriptExecutionResult::failure("Script execution failed", e.to_string())
            }
        }
    }

    /// Install the completion callback, replacing any previous one.
    pub fn on_completion(&self, callback: CompletionCallback) {
        *self.completion.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Signal task completion to the registered callback.
    pub fn attempt_completion(&self, result: &str) -> Result<(), ToolError> {
        let callback = self
            .completion
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ToolError::NoCompletionCallback)?;
        callback(result);
        Ok(())
    }

    /// The fixed two-tool surface.
    pub fn common_tools(&self) -> Vec<ToolSpec> {
        let bindings: Vec<&str> = self
            .states
            .values()
            .filter(|e| e.permission.is_writable())
            .map(|e| e.name.as_str())
            .collect();
        let bindings = if bindings.is_empty() {
            "none".to_string()
        } else {
            bindings.join(", ")
        };
        vec![
            ToolSpec::function(
                EXECUTE_SCRIPT,
                format!(
                    "Run a script against the workspace state. Writable state bindings: {bindings}. \
                     Assign through `<name>.value`; `return` a value to see it in the result."
                ),
                json!({
                    "type": "object",
                    "properties": {
                        "script": {
                            "type": "string",
                            "description": "The script source"
                        }
                    },
                    "required": ["script"]
                }),
            ),
            ToolSpec::function(
                ATTEMPT_COMPLETION,
                "Finish the task and report the final result to the user.",
                json!({
                    "type": "object",
                    "properties": {
                        "result": {
                            "type": "string",
                            "description": "What was done"
                        }
                    },
                    "required": ["result"]
                }),
            ),
        ]
    }

    /// The script guide: writable bindings, utilities, tools, examples.
    pub fn render_script_section(&self) -> String {
        let bindings: Vec<(String, Value)> = self
            .states
            .values()
            .filter(|e| e.permission.is_writable())
            .map(|e| (e.name.clone(), e.state.get()))
            .collect();
        let utilities: Vec<(String, String)> = self
            .utilities
            .iter()
            .filter(|(name, _)| !self.states.contains_key(*name))
            .map(|(name, u)| (name.clone(), u.description.clone()))
            .collect();
        render::render_script_guide(&bindings, &utilities)
    }
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("utilities", &self.utilities.keys().collect::<Vec<_>>())
            .field("component_count", &self.component_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{StatefulComponent, Utility};
    use crate::schema::Schema;
    use statehive_config::ScriptSettings;
    use statehive_script::SandboxPolicy;
    use std::sync::Mutex;

    fn component(name: &str, states: Vec<State>) -> Arc<dyn Component> {
        let mut builder = StatefulComponent::builder(name);
        for state in states {
            builder = builder.state(state);
        }
        Arc::new(builder.build().unwrap())
    }

    fn int_state(name: &str, permission: Permission, value: i64) -> State {
        State::new(name, permission, Schema::Integer, json!(value)).unwrap()
    }

    fn runtime(components: &[(&str, Arc<dyn Component>)]) -> ScriptRuntime {
        ScriptRuntime::build(
            components.iter().map(|(k, c)| (*k, c)),
            Arc::new(SandboxPolicy::default()),
        )
    }

    #[tokio::test]
    async fn executes_against_merged_state() {
        let counter = component("counter", vec![int_state("count", Permission::ReadAndWrite, 0)]);
        let rt = runtime(&[("counter", counter.clone())]);

        let result = rt.execute("count.value = 5\nreturn count.value").await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.message, "Script executed successfully");
        assert_eq!(result.output, Some(json!(5)));
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata.component_count, 1);
        assert_eq!(metadata.state_count, 1);
        assert_eq!(counter.states()[0].get(), json!(5));
    }

    #[tokio::test]
    async fn read_only_states_are_not_bound() {
        let c = component(
            "c",
            vec![
                int_state("total", Permission::ReadOnly, 7),
                int_state("count", Permission::WriteOnly, 0),
            ],
        );
        let rt = runtime(&[("c", c.clone())]);

        let result = rt.execute("total.value = 1").await;
        assert!(!result.success);
        assert_eq!(result.message, "Script execution failed");
        assert!(result.error.unwrap().contains("total is not defined"));
        assert_eq!(c.states()[0].get(), json!(7));
        assert!(rt.sandbox().state("total").is_none());
        assert!(rt.sandbox().state("count").is_some());
    }

    #[tokio::test]
    async fn duplicate_names_later_wins_with_warning() {
        let a = component("a", vec![int_state("shared", Permission::ReadAndWrite, 1)]);
        let b = component("b", vec![int_state("shared", Permission::ReadAndWrite, 2)]);
        let rt = runtime(&[("a", a.clone()), ("b", b.clone())]);

        assert_eq!(rt.state_count(), 1);
        assert_eq!(rt.state("shared").unwrap().component_key, "b");
        assert_eq!(rt.warnings().len(), 1);
        assert!(rt.warnings()[0].contains("'shared'"));

        let result = rt.execute("shared.value = shared.value + 10").await;
        assert!(result.success);
        assert_eq!(b.states()[0].get(), json!(12));
        assert_eq!(a.states()[0].get(), json!(1));
    }

    #[tokio::test]
    async fn validation_failures_do_not_execute() {
        let c = component("c", vec![int_state("count", Permission::ReadAndWrite, 0)]);
        let rt = runtime(&[("c", c.clone())]);

        let denied = rt.execute("count.value = 1\neval('2')").await;
        assert!(!denied.success);
        assert_eq!(denied.message, "Script validation failed");
        assert!(denied.error.unwrap().contains("'eval'"));
        assert_eq!(c.states()[0].get(), json!(0));

        let syntax = rt.execute("count.value = ").await;
        assert_eq!(syntax.message, "Script validation failed");
    }

    #[tokio::test]
    async fn schema_violations_surface_as_execution_errors() {
        let c = component("c", vec![int_state("count", Permission::ReadAndWrite, 0)]);
        let rt = runtime(&[("c", c)]);
        let result = rt.execute("count.value = 'many'").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("expected integer"));
    }

    #[tokio::test]
    async fn runaway_scripts_hit_the_iteration_budget() {
        let settings = ScriptSettings {
            max_iterations: 100,
            ..ScriptSettings::default()
        };
        let rt = ScriptRuntime::build(
            std::iter::empty(),
            Arc::new(SandboxPolicy::from_settings(&settings)),
        );
        let result = rt.execute("let i = 0\nwhile (true) { i++ }").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Iteration limit of 100"));
    }

    #[tokio::test]
    async fn script_writes_notify_subscribers() {
        let c = component("c", vec![int_state("count", Permission::ReadAndWrite, 0)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = c.states()[0].subscribe(move |change| sink.lock().unwrap().push(change.current.clone()));

        let rt = runtime(&[("c", c)]);
        rt.execute("count.value = 1\ncount.value += 1").await;
        assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn utilities_are_bound() {
        let math: Arc<dyn Component> = Arc::new(
            StatefulComponent::builder("math")
                .utility(Utility::new("double", "Doubles a number", |args| {
                    let n = args.first().and_then(Value::as_f64).ok_or("expected a number")?;
                    Ok(json!(n * 2.0))
                }))
                .build()
                .unwrap(),
        );
        let rt = runtime(&[("math", math)]);
        let result = rt.execute("return double(4)").await;
        assert_eq!(result.output.and_then(|v| v.as_f64()), Some(8.0));
        assert!(rt.render_script_section().contains("- double(): Doubles a number"));
    }

    #[test]
    fn completion_requires_a_callback() {
        let rt = runtime(&[]);
        assert!(matches!(
            rt.attempt_completion("done"),
            Err(ToolError::NoCompletionCallback)
        ));

        let received = Arc::new(Mutex::new(String::new()));
        let sink = received.clone();
        rt.on_completion(Arc::new(move |result| *sink.lock().unwrap() = result.to_string()));
        rt.attempt_completion("all done").unwrap();
        assert_eq!(*received.lock().unwrap(), "all done");
    }

    #[test]
    fn common_tools_are_the_two_script_tools() {
        let rt = runtime(&[]);
        let names: Vec<String> = rt.common_tools().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec![EXECUTE_SCRIPT, ATTEMPT_COMPLETION]);
    }

    #[test]
    fn result_serializes_without_empty_fields() {
        let failure = WorkspaceScriptExecutionResult::failure("Script execution failed", "boom".into());
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"success": false, "message": "Script execution failed", "error": "boom"})
        );
    }
}
