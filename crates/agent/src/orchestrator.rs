//! The request loop.
//!
//! ```text
//! start(query)
//!   └─ loop over a LIFO stack of StackItems
//!        ├─ render the workspace
//!        ├─ ask the model (raced against the request timeout)
//!        ├─ dispatch its tool call through the ToolDispatcher
//!        ├─ record assistant message, tool results, workspace snapshot
//!        └─ push "workspace changed" unless the model completed
//! ```
//!
//! A failed turn is handed to [`AgentOrchestrator::handle_error`], which
//! either re-pushes the same content behind an error preamble or aborts the
//! run. Consecutive mistakes (replies without a usable tool call, or turns
//! where every tool call failed) trip a separate circuit breaker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use statehive_config::AgentSettings;
use statehive_core::{
    AgentStatus, ContentBlock, ConversationMessage, ModelClient, ModelError, ModelRequest, Observers,
    Role, Subscription, TimeoutConfig, TokenUsage,
};
use statehive_workspace::Workspace;

use crate::dispatcher::{ToolDispatcher, ToolUsage};
use crate::error::AgentError;
use crate::event::AgentEvent;
use crate::prompt::{self, DEFAULT_SYSTEM_PROMPT, WORKSPACE_CHANGED};
use crate::stack::StackItem;

/// Cloneable abort flag. Setting it stops the loop at its next poll point:
/// the top of an iteration or a tool-call boundary.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct AgentOrchestrator {
    workspace: Arc<Workspace>,
    client: Arc<dyn ModelClient>,
    settings: AgentSettings,
    system_prompt: String,
    dispatcher: ToolDispatcher,
    status: AgentStatus,
    history: Vec<ConversationMessage>,
    errors: Vec<AgentError>,
    stack: Vec<StackItem>,
    consecutive_mistakes: u32,
    turns: u32,
    token_usage: TokenUsage,
    completion_result: Option<String>,
    abort_reason: Option<String>,
    abort: AbortHandle,
    events: Observers<AgentEvent>,
}

impl AgentOrchestrator {
    pub fn new(
        workspace: Arc<Workspace>,
        client: Arc<dyn ModelClient>,
        settings: AgentSettings,
    ) -> Self {
        let system_prompt = settings
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            dispatcher: ToolDispatcher::new(workspace.clone()),
            workspace,
            client,
            settings,
            system_prompt,
            status: AgentStatus::Idle,
            history: Vec::new(),
            errors: Vec::new(),
            stack: Vec::new(),
            consecutive_mistakes: 0,
            turns: 0,
            token_usage: TokenUsage::default(),
            completion_result: None,
            abort_reason: None,
            abort: AbortHandle::default(),
            events: Observers::new(),
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    /// Every error recorded by the error handler, oldest first.
    pub fn errors(&self) -> &[AgentError] {
        &self.errors
    }

    pub fn consecutive_mistakes(&self) -> u32 {
        self.consecutive_mistakes
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.token_usage
    }

    /// The `result` text of the completion call, once the model made one.
    pub fn completion_result(&self) -> Option<&str> {
        self.completion_result.as_deref()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn tool_usage(&self) -> std::collections::BTreeMap<String, ToolUsage> {
        self.dispatcher.usage()
    }

    /// A handle other tasks can use to abort the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn subscribe(&self, callback: impl Fn(&AgentEvent) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    /// Run the loop for `query` until it completes or aborts.
    ///
    /// The query is appended to history before the first turn. Returns the final status. The only error returned from a running
    /// loop is [`AgentError::ConsecutiveMistakeLimit`]; every other failure
    /// is recorded in [`AgentOrchestrator::errors`] and reflected in the
    /// status.
    pub async fn start(&mut self, query: &str) -> Result<AgentStatus, AgentError> {
        if self.status != AgentStatus::Idle {
            return Err(AgentError::InvalidState {
                status: self.status.to_string(),
            });
        }
        info!(client = self.client.name(), "Agent run starting");
        self.push_message(ConversationMessage::user(query));
        self.set_status(AgentStatus::Running);
        self.stack = vec![StackItem::user(query).transcribed()];
        self.run_loop().await?;
        Ok(self.status)
    }

    async fn run_loop(&mut self) -> Result<(), AgentError> {
        while let Some(item) = self.stack.pop() {
            if self.abort.is_aborted() || self.status.is_terminal() {
                self.stack.clear();
                self.abort("abort requested");
                return Ok(());
            }

            let limit = self.settings.consecutive_mistake_limit;
            if self.consecutive_mistakes > 0 && self.consecutive_mistakes >= limit {
                warn!(limit, "Consecutive mistake limit reached");
                self.consecutive_mistakes = 0;
                let error = AgentError::ConsecutiveMistakeLimit { limit };
                self.handle_error(&error, &item);
                self.stack.clear();
                self.abort(&error.to_string());
                return Err(error);
            }

            let recorded = item.should_record();
            if recorded {
                self.push_message(ConversationMessage::new(Role::User, item.content.clone()));
            }

            if self.turns >= self.settings.max_turns {
                warn!(max_turns = self.settings.max_turns, "Turn limit reached");
                self.stack.clear();
                self.abort("turn limit reached");
                return Ok(());
            }
            self.turns += 1;

            let pending = if recorded || item.transcribed {
                None
            } else {
                Some(&item)
            };
            match self.turn(pending).await {
                Ok(true) => {}
                Ok(false) => self.stack.push(StackItem::system(WORKSPACE_CHANGED)),
                Err(error) => {
                    if self.handle_error(&error, &item) {
                        self.stack.clear();
                        self.abort(&error.to_string());
                        return Ok(());
                    }
                    let preamble = prompt::error_preamble(
                        &error.to_string(),
                        item.retry_attempt + 1,
                        self.settings.max_retry_attempts,
                    );
                    self.stack.push(item.retry(preamble));
                }
            }
        }

        self.complete();
        Ok(())
    }

    /// One model call and its dispatch. Returns whether the model completed.
    async fn turn(&mut self, pending: Option<&StackItem>) -> Result<bool, AgentError> {
        let snapshot = self.workspace.render();
        let request = ModelRequest {
            system_prompt: self.system_prompt.clone(),
            workspace_context: self.workspace.render_with_script_section(),
            memory_context: prompt::memory_context(&self.history, pending),
            timeout: TimeoutConfig {
                timeout_ms: self.settings.request_timeout_ms,
            },
            tools: self.workspace.tool_specs(),
        };

        let started = Instant::now();
        let timeout = request.timeout;
        let response = tokio::time::timeout(timeout.as_duration(), self.client.make_request(request))
            .await
            .map_err(|_| ModelError::Timeout {
                timeout_ms: timeout.timeout_ms,
            })??;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            tool_calls = response.tool_calls.len(),
            "Model replied"
        );
        if response.is_empty() {
            return Err(AgentError::NoApiResponse);
        }
        self.token_usage.accumulate(&response.token_usage);

        let mut content = Vec::new();
        if let Some(text) = response.text_response.as_deref().filter(|t| !t.trim().is_empty()) {
            content.push(ContentBlock::text(text));
        }
        let Some(wire) = response.tool_calls.first() else {
            return Err(AgentError::NoToolsUsed);
        };
        if response.tool_calls.len() > 1 {
            warn!(
                ignored = response.tool_calls.len() - 1,
                "Model emitted several tool calls, only the first is used"
            );
        }
        let call = wire
            .parse()
            .map_err(|e| AgentError::InvalidToolArguments(e.to_string()))?;
        content.push(ContentBlock::ToolUse {
            id: wire.call_id.clone(),
            name: call.tool_name,
            input: call.tool_params,
        });

        let abort = self.abort.clone();
        let outcome = self
            .dispatcher
            .execute_tool_calls(&mut content, || abort.is_aborted())
            .await;
        for execution in &outcome.executions {
            self.events.notify(&AgentEvent::ToolExecuted {
                tool_name: execution.tool_name.clone(),
                success: execution.success,
                duration_ms: execution.duration_ms,
            });
        }

        if outcome.did_attempt_completion {
            self.consecutive_mistakes = 0;
            self.completion_result = outcome.completion_result.clone();
        } else if !outcome.executions.is_empty() {
            if outcome.executions.iter().all(|e| !e.success) {
                self.consecutive_mistakes += 1;
                debug!(mistakes = self.consecutive_mistakes, "Every tool call failed");
            } else {
                self.consecutive_mistakes = 0;
            }
        }

        self.push_message(ConversationMessage::new(Role::Assistant, content));
        if !outcome.user_message_content.is_empty() {
            self.push_message(ConversationMessage::new(
                Role::User,
                outcome.user_message_content,
            ));
        }
        self.push_message(ConversationMessage::system(snapshot));

        Ok(outcome.did_attempt_completion)
    }

    /// Record `error` and decide whether the run must abort.
    ///
    /// Aborts when the item has used up its retries or the error is not
    /// retryable. Replies without a usable tool call also count as a
    /// consecutive mistake.
    pub fn handle_error(&mut self, error: &AgentError, item: &StackItem) -> bool {
        if error.is_mistake() {
            self.consecutive_mistakes += 1;
        }
        let should_abort =
            !error.is_retryable() || item.retry_attempt >= self.settings.max_retry_attempts;
        warn!(
            error = %error,
            retry_attempt = item.retry_attempt,
            mistakes = self.consecutive_mistakes,
            should_abort,
            "Turn failed"
        );
        self.errors.push(error.clone());
        self.events.notify(&AgentEvent::ErrorRecorded {
            message: error.to_string(),
            retry_attempt: item.retry_attempt,
            will_retry: !should_abort,
        });
        should_abort
    }

    /// Stop the run. Has no effect once the run completed or aborted.
    pub fn abort(&mut self, reason: &str) {
        self.abort.abort();
        if self.status.is_terminal() {
            return;
        }
        info!(reason, "Agent aborted");
        self.abort_reason = Some(reason.to_string());
        self.set_status(AgentStatus::Aborted);
    }

    /// Mark the run completed. Has no effect once the run completed or
    /// aborted.
    pub fn complete(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        info!(turns = self.turns, "Agent completed");
        self.set_status(AgentStatus::Completed);
    }

    fn set_status(&mut self, status: AgentStatus) {
        let from = self.status;
        self.status = status;
        self.events.notify(&AgentEvent::StatusChanged { from, to: status });
    }

    fn push_message(&mut self, message: ConversationMessage) {
        debug!(role = %message.role, blocks = message.content.len(), "Message added");
        self.events.notify(&AgentEvent::MessageAdded {
            message: message.clone(),
        });
        self.history.push(message);
    }
}

impl std::fmt::Debug for AgentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOrchestrator")
            .field("status", &self.status)
            .field("messages", &self.history.len())
            .field("errors", &self.errors.len())
            .field("consecutive_mistakes", &self.consecutive_mistakes)
            .finish()
    }
}
