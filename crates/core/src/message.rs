//! Conversation message types.
//!
//! These are the value objects the orchestrator appends to its history:
//! user turn → assistant reply (text and/or tool use) → tool results →
//! workspace snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (tool results are transcribed as user content)
    User,
    /// The model
    Assistant,
    /// Runtime-generated context (workspace snapshots, notices)
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        f.write_str(name)
    }
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },

    /// A tool invocation emitted by the model.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The outcome of a tool invocation.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// The text of a `Text` block, `None` for the other variants.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single message in the orchestrator's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique message ID
    pub id: String,

    /// Who produced this message
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a user message from plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// Create a system message from plain text.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    /// Concatenated text of all `Text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the message as a transcript entry for the model's memory context.
    pub fn transcript(&self) -> String {
        let mut out = format!("[{}]", self.role);
        for block in &self.content {
            match block {
                ContentBlock::Text { text } => {
                    out.push('\n');
                    out.push_str(text);
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    out.push_str(&format!("\n<tool_use name=\"{name}\">{input}</tool_use>"));
                }
                ContentBlock::ToolResult {
                    content, is_error, ..
                } => {
                    let tag = if *is_error { "tool_error" } else { "tool_result" };
                    out.push_str(&format!("\n<{tag}>{content}</{tag}>"));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = ConversationMessage::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
        assert_eq!(msg.content.len(), 1);
    }

    #[test]
    fn content_block_uses_type_discriminant() {
        let block = ContentBlock::ToolUse {
            id: "call_1".into(),
            name: "execute_script".into(),
            input: serde_json::json!({"script": "count.value = 1"}),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "execute_script");

        let text = serde_json::to_value(ContentBlock::text("hi")).unwrap();
        assert_eq!(text["type"], "text");
    }

    #[test]
    fn text_skips_non_text_blocks() {
        let msg = ConversationMessage::new(
            Role::Assistant,
            vec![
                ContentBlock::text("thinking"),
                ContentBlock::ToolUse {
                    id: "1".into(),
                    name: "execute_script".into(),
                    input: serde_json::json!({}),
                },
            ],
        );
        assert_eq!(msg.text(), "thinking");
    }

    #[test]
    fn transcript_marks_errors() {
        let msg = ConversationMessage::new(
            Role::User,
            vec![ContentBlock::ToolResult {
                tool_use_id: "1".into(),
                content: "{\"error\":\"boom\"}".into(),
                is_error: true,
            }],
        );
        let text = msg.transcript();
        assert!(text.starts_with("[user]"));
        assert!(text.contains("<tool_error>"));
    }
}
