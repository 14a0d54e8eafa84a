//! Prompt text assembled by the orchestrator.
//!
//! The model sees three inputs per turn: the system prompt, the rendered
//! workspace with its script guide, and the memory context. The memory
//! context is the history transcript followed by the pending stack item when
//! that item was not transcribed into history.

use statehive_core::{ContentBlock, ConversationMessage};

use crate::stack::StackItem;

/// Used unless `agent.system_prompt` overrides it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You operate on a shared workspace of typed states. \
The current workspace is rendered below, together with a guide to the scripting tool.

Work by calling `execute_script` with a short script that reads and assigns state through \
`<name>.value`. Each tool result tells you whether the script succeeded and what it returned. \
Call exactly one tool per reply. When the task is done, call `attempt_completion` with a short \
summary of what you did.";

/// Pushed after every turn that did not complete the task.
pub const WORKSPACE_CHANGED: &str = "The workspace state may have changed. Review the updated \
workspace and continue with the task, or call attempt_completion if it is done.";

/// Prepended to the content of a re-pushed stack item.
pub fn error_preamble(error: &str, attempt: u32, max_attempts: u32) -> String {
    format!(
        "[ERROR] Attempt {attempt} of {max_attempts} failed: {error}\n\
         Fix the problem and try again. Reply with exactly one tool call."
    )
}

/// Transcript of `history`, plus `pending` when it is not part of it.
pub fn memory_context(history: &[ConversationMessage], pending: Option<&StackItem>) -> String {
    let mut parts: Vec<String> = history.iter().map(ConversationMessage::transcript).collect();
    if let Some(item) = pending {
        let text = item
            .content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("[{}]\n{text}", item.sender));
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_names_attempt_and_error() {
        let text = error_preamble("Request timed out after 10ms", 1, 3);
        assert!(text.starts_with("[ERROR] Attempt 1 of 3 failed: Request timed out"));
    }

    #[test]
    fn pending_item_follows_history() {
        let history = vec![ConversationMessage::user("set the counter to 5")];
        let pending = StackItem::system(WORKSPACE_CHANGED);
        let text = memory_context(&history, Some(&pending));
        assert!(text.starts_with("[user]\nset the counter to 5"));
        assert!(text.ends_with(&format!("[system]\n{WORKSPACE_CHANGED}")));
        assert_eq!(memory_context(&history, None), "[user]\nset the counter to 5");
    }
}
