//! Tool dispatch for one model turn.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use statehive_core::tool::ATTEMPT_COMPLETION;
use statehive_core::{ContentBlock, ToolError};
use statehive_workspace::Workspace;

/// Attempts and failures of one tool across the dispatcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolUsage {
    pub attempts: u32,
    pub failures: u32,
}

/// One finished tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    pub tool_name: String,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Tool-result blocks for the next user message.
    pub user_message_content: Vec<ContentBlock>,
    pub did_attempt_completion: bool,
    /// The `result` text of the completion call.
    pub completion_result: Option<String>,
    pub executions: Vec<ToolExecution>,
}

pub struct ToolDispatcher {
    workspace: Arc<Workspace>,
    usage: Mutex<BTreeMap<String, ToolUsage>>,
}

impl ToolDispatcher {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            usage: Mutex::new(BTreeMap::new()),
        }
    }

    /// Run the tool-use blocks in `blocks` in order, one at a time.
    ///
    /// Each tool-use block is given a fresh id, written back into `blocks`
    /// so the assistant message and its results agree. `is_aborted` is
    /// checked before and after every call. A completion call discards the
    /// results gathered so far and ends the turn.
    pub async fn execute_tool_calls(
        &self,
        blocks: &mut [ContentBlock],
        is_aborted: impl Fn() -> bool,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for block in blocks.iter_mut() {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };
            if is_aborted() {
                debug!("Abort requested before tool call");
                break;
            }

            *id = format!("toolu_{}", uuid::Uuid::new_v4().simple());
            self.record_attempt(name);

            if name.as_str() == ATTEMPT_COMPLETION {
                let result = completion_text(input);
                if let Err(e) = self.workspace.attempt_completion(&result) {
                    debug!(error = %e, "Completion signalled without a workspace callback");
                }
                info!(result_len = result.len(), "Completion tool called");
                outcome.user_message_content.clear();
                outcome.did_attempt_completion = true;
                outcome.completion_result = Some(result);
                outcome.executions.push(ToolExecution {
                    tool_name: name.clone(),
                    success: true,
                    duration_ms: 0,
                });
                break;
            }

            let start = Instant::now();
            let result = self.workspace.handle_tool_call(name, input.clone()).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (content, success) = match result {
                Ok(payload) => {
                    let success = payload.get("success") != Some(&Value::Bool(false));
                    (payload.to_string(), success)
                }
                Err(e) => {
                    warn!(tool = %name, error = %e, "Tool call failed");
                    (error_payload(&e), false)
                }
            };
            if !success {
                self.record_failure(name);
            }
            debug!(tool = %name, success, duration_ms, "Tool executed");

            outcome.user_message_content.push(ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content,
                is_error: !success,
            });
            outcome.executions.push(ToolExecution {
                tool_name: name.clone(),
                success,
                duration_ms,
            });

            if is_aborted() {
                debug!("Abort requested after tool call");
                break;
            }
        }

        outcome
    }

    /// Usage counters, by tool name.
    pub fn usage(&self) -> BTreeMap<String, ToolUsage> {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_attempt(&self, name: &str) {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.entry(name.to_string()).or_default().attempts += 1;
    }

    fn record_failure(&self, name: &str) {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.entry(name.to_string()).or_default().failures += 1;
    }
}

fn completion_text(input: &Value) -> String {
    match input.get("result") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn error_payload(error: &ToolError) -> String {
    json!({ "error": error.to_string() }).to_string()
}
