//! The retry stack.

use serde::{Deserialize, Serialize};
use statehive_core::ContentBlock;

/// Who a pending turn is on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    System,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Sender::User => "user",
            Sender::System => "system",
        })
    }
}

/// One pending unit of work.
///
/// A failed turn is re-pushed as a new item carrying the same content behind
/// an error preamble, with `retry_attempt` one higher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackItem {
    pub sender: Sender,
    pub content: Vec<ContentBlock>,
    pub retry_attempt: u32,
    #[serde(default)]
    pub user_message_was_removed: bool,
    /// The content is already in history, so the loop neither records it
    /// again nor repeats it in the memory context.
    #[serde(default)]
    pub transcribed: bool,
}

impl StackItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, vec![ContentBlock::text(text)])
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Sender::System, vec![ContentBlock::text(text)])
    }

    fn new(sender: Sender, content: Vec<ContentBlock>) -> Self {
        Self {
            sender,
            content,
            retry_attempt: 0,
            user_message_was_removed: false,
            transcribed: false,
        }
    }

    /// Mark the content as already appended to history.
    pub fn transcribed(mut self) -> Self {
        self.transcribed = true;
        self
    }

    /// The item to push after this one failed.
    pub fn retry(&self, preamble: impl Into<String>) -> Self {
        let mut content = Vec::with_capacity(self.content.len() + 1);
        content.push(ContentBlock::text(preamble));
        content.extend(self.content.iter().cloned());
        Self {
            sender: self.sender,
            content,
            retry_attempt: self.retry_attempt + 1,
            user_message_was_removed: false,
            transcribed: false,
        }
    }

    /// Whether the loop should transcribe this item into history as a user
    /// message: only the first attempt of a user turn, or a turn whose
    /// earlier transcription was removed.
    pub fn should_record(&self) -> bool {
        if self.transcribed {
            return false;
        }
        (self.sender == Sender::User && self.retry_attempt == 0) || self.user_message_was_removed
    }
}
