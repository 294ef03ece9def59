use crate::types::{ChatMessage, MessageRole};

/// Append-only conversation transcript with a fixed exchange window, the
/// way the production agent kept only the last few turns in its buffer
/// memory. System and few-shot messages are not stored here; the session
/// prepends them per request.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
    /// Maximum user/assistant exchanges handed to the model per request.
    window: usize,
}

pub const DEFAULT_WINDOW: usize = 5;

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            messages: Vec::new(),
            window: window.max(1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::assistant(content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user turns so far; the driver infers the phase from it
    /// (first agent reply = Phase 1, everything later = Phase 2).
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role == MessageRole::User)
            .count()
    }

    /// The transcript slice sent to the model: everything from the first
    /// message of the last `window` user exchanges onward.
    pub fn windowed(&self) -> &[ChatMessage] {
        let mut seen = 0usize;
        let mut start = 0usize;
        for (index, message) in self.messages.iter().enumerate().rev() {
            if message.role == MessageRole::User {
                seen += 1;
                if seen == self.window {
                    start = index;
                    break;
                }
            }
        }
        &self.messages[start..]
    }
}
