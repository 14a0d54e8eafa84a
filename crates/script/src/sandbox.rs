//! The execution surface a script runs against, and the policy that
//! guards it.
//!
//! A [`Sandbox`] holds exactly the names a script may reference besides the
//! builtin allow-list: state bindings and utility functions. A
//! [`SecureExecutionContext`] validates script text before it runs and hands
//! out an [`ExecutionMeter`] that bounds the run by iteration count and
//! wall-clock time.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use statehive_config::ScriptSettings;

use crate::ScriptError;
use crate::lexer::{TemplateChunk, Token, tokenize, tokenize_at};
use crate::parser::DEFAULT_MAX_NESTING_DEPTH;

/// A live, writable value bound into the sandbox under a name.
///
/// Writes must go through the owner's own setter so that validation and
/// change notification behave exactly as for a direct mutation.
pub trait StateBinding: Send + Sync {
    fn get(&self) -> Value;

    /// Store a new value. The error text is surfaced to the script author.
    fn set(&self, value: Value) -> Result<(), String>;
}

/// A named helper callable from scripts. May suspend.
#[async_trait]
pub trait ScriptFunction: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<Value, String>;
}

/// Adapter turning a synchronous closure into a [`ScriptFunction`].
pub struct FnFunction<F>(F);

impl<F> FnFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> ScriptFunction for FnFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, String> + Send + Sync,
{
    async fn call(&self, args: Vec<Value>) -> Result<Value, String> {
        (self.0)(args)
    }
}

/// The bindings visible to one script execution.
#[derive(Clone, Default)]
pub struct Sandbox {
    states: BTreeMap<String, Arc<dyn StateBinding>>,
    functions: BTreeMap<String, Arc<dyn ScriptFunction>>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a state. A later binding under the same name replaces the
    /// earlier one.
    pub fn bind_state(&mut self, name: impl Into<String>, binding: Arc<dyn StateBinding>) {
        self.states.insert(name.into(), binding);
    }

    pub fn bind_function(&mut self, name: impl Into<String>, function: Arc<dyn ScriptFunction>) {
        self.functions.insert(name.into(), function);
    }

    pub fn state(&self, name: &str) -> Option<&Arc<dyn StateBinding>> {
        self.states.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Arc<dyn ScriptFunction>> {
        self.functions.get(name)
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Every name a script body can reference directly.
    pub fn binding_names(&self) -> Vec<String> {
        self.states
            .keys()
            .chain(self.functions.keys())
            .cloned()
            .collect()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Validates scripts before execution and meters them while they run.
pub trait SecureExecutionContext: Send + Sync {
    /// Policy violations found in `script`. Empty means the script may run.
    fn validate(&self, script: &str) -> Vec<String>;

    /// Start accounting for one execution.
    fn begin(&self) -> ExecutionMeter;

    /// Hard wall-clock limit the caller races the execution against.
    fn timeout(&self) -> Duration;

    /// Deepest nesting the parser accepts.
    fn max_nesting_depth(&self) -> usize {
        DEFAULT_MAX_NESTING_DEPTH
    }
}

/// Default policy: size limit, denied identifiers, iteration and time
/// budgets.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    max_script_bytes: usize,
    denied_identifiers: Vec<String>,
    max_iterations: u64,
    max_nesting_depth: usize,
    timeout: Duration,
}

impl SandboxPolicy {
    pub fn from_settings(settings: &ScriptSettings) -> Self {
        Self {
            max_script_bytes: settings.max_script_bytes,
            denied_identifiers: settings.denied_identifiers.clone(),
            max_iterations: settings.max_iterations,
            max_nesting_depth: settings.max_nesting_depth,
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    pub fn max_iterations(&self) -> u64 {
        self.max_iterations
    }

    fn check_tokens(
        &self,
        source: &str,
        first_line: usize,
        depth: usize,
        errors: &mut Vec<String>,
    ) {
        if depth > self.max_nesting_depth {
            errors.push(format!(
                "Template expressions are nested more than {} levels deep (line {first_line})",
                self.max_nesting_depth
            ));
            return;
        }
        let tokens = match tokenize_at(source, first_line) {
            Ok(tokens) => tokens,
            Err(e) => {
                errors.push(e.to_string());
                return;
            }
        };
        for spanned in tokens {
            match spanned.token {
                Token::Ident(name) if self.denied_identifiers.contains(&name) => {
                    errors.push(format!(
                        "Use of '{name}' is not allowed (line {})",
                        spanned.line
                    ));
                }
                Token::Str(s) if self.denied_identifiers.contains(&s) => {
                    errors.push(format!(
                        "Use of '{s}' is not allowed (line {})",
                        spanned.line
                    ));
                }
                Token::Template(chunks) => {
                    for chunk in chunks {
                        if let TemplateChunk::Expr { source, line } = chunk {
                            self.check_tokens(&source, line, depth + 1, errors);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::from_settings(&ScriptSettings::default())
    }
}

impl SecureExecutionContext for SandboxPolicy {
    fn validate(&self, script: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if script.trim().is_empty() {
            errors.push("Script is empty".to_string());
            return errors;
        }
        if script.len() > self.max_script_bytes {
            errors.push(format!(
                "Script is {} bytes, the limit is {}",
                script.len(),
                self.max_script_bytes
            ));
            return errors;
        }
        // Surface lexer errors once, with their position, before scanning.
        if let Err(e) = tokenize(script) {
            errors.push(e.to_string());
            return errors;
        }
        self.check_tokens(script, 1, 0, &mut errors);
        errors
    }

    fn begin(&self) -> ExecutionMeter {
        ExecutionMeter::new(self.max_iterations, self.timeout)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn max_nesting_depth(&self) -> usize {
        self.max_nesting_depth
    }
}

/// Per-execution accounting: elapsed time and iteration count.
#[derive(Debug)]
pub struct ExecutionMeter {
    started: Instant,
    timeout: Duration,
    max_iterations: u64,
    iterations: AtomicU64,
}

/// Final figures of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStats {
    pub elapsed_ms: u64,
    pub iterations: u64,
}

impl ExecutionMeter {
    pub fn new(max_iterations: u64, timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            max_iterations,
            iterations: AtomicU64::new(0),
        }
    }

    /// Count one statement or loop iteration. Fails once either budget is
    /// spent.
    pub fn tick(&self) -> Result<(), ScriptError> {
        let count = self.iterations.fetch_add(1, Ordering::Relaxed) + 1;
        if count > self.max_iterations {
            return Err(ScriptError::IterationLimit {
                limit: self.max_iterations,
            });
        }
        if self.started.elapsed() > self.timeout {
            return Err(ScriptError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(&self) -> ExecutionStats {
        ExecutionStats {
            elapsed_ms: self.elapsed().as_millis() as u64,
            iterations: self.iterations().min(self.max_iterations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn denied_identifiers_are_reported() {
        let policy = SandboxPolicy::default();
        let errors = policy.validate("let f = eval\nprocess.exit(1)");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("'eval'"));
        assert!(errors[1].contains("line 2"));
    }

    #[test]
    fn denied_names_inside_templates_and_string_keys() {
        let policy = SandboxPolicy::default();
        assert!(!policy.validate("let s = `${globalThis}`").is_empty());
        assert!(!policy.validate("x.value[\"__proto__\"] = 1").is_empty());
    }

    #[test]
    fn clean_script_passes() {
        let policy = SandboxPolicy::default();
        assert!(policy.validate("count.value = count.value + 1").is_empty());
    }

    #[test]
    fn empty_and_oversized_scripts_rejected() {
        let settings = ScriptSettings {
            max_script_bytes: 8,
            ..ScriptSettings::default()
        };
        let policy = SandboxPolicy::from_settings(&settings);
        assert!(policy.validate("   ")[0].contains("empty"));
        assert!(policy.validate("count.value = 12345")[0].contains("limit is 8"));
    }

    #[test]
    fn deeply_nested_templates_are_rejected() {
        let mut src = "1".to_string();
        for _ in 0..300 {
            src = format!("`${{{src}}}`");
        }
        let errors = SandboxPolicy::default().validate(&format!("return {src}"));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("more than 64 levels"));
    }

    #[test]
    fn lexer_errors_become_validation_errors() {
        let policy = SandboxPolicy::default();
        let errors = policy.validate("let s = 'open");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("line 1"));
    }

    #[test]
    fn meter_enforces_iteration_budget() {
        let meter = ExecutionMeter::new(2, Duration::from_secs(5));
        assert!(meter.tick().is_ok());
        assert!(meter.tick().is_ok());
        assert_eq!(
            meter.tick(),
            Err(ScriptError::IterationLimit { limit: 2 })
        );
        assert_eq!(meter.finish().iterations, 2);
    }

    #[test]
    fn meter_enforces_timeout() {
        let meter = ExecutionMeter::new(100, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(meter.tick(), Err(ScriptError::Timeout { .. })));
    }

    #[tokio::test]
    async fn closure_functions_are_callable() {
        let double = FnFunction::new(|args: Vec<Value>| {
            let n = args.first().and_then(Value::as_f64).ok_or("expected a number")?;
            Ok(json!(n * 2.0))
        });
        assert_eq!(double.call(vec![json!(4)]).await.unwrap(), json!(8.0));
        assert!(double.call(vec![]).await.is_err());
    }

    #[test]
    fn binding_names_cover_states_and_functions() {
        struct Fixed;
        impl StateBinding for Fixed {
            fn get(&self) -> Value {
                json!(1)
            }
            fn set(&self, _: Value) -> Result<(), String> {
                Ok(())
            }
        }

        let mut sandbox = Sandbox::new();
        sandbox.bind_state("count", Arc::new(Fixed));
        sandbox.bind_function("double", Arc::new(FnFunction::new(|_| Ok(Value::Null))));
        assert_eq!(sandbox.binding_names(), vec!["count", "double"]);
        assert_eq!(sandbox.state_count(), 1);
    }
}
