use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::llm::{ChatMessage, Role};

/// One spoken line in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Unix epoch milliseconds
    pub at_ms: u64,
}

/// Append-only record of what was said, owned by exactly one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnHistory {
    turns: Vec<Turn>,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl TurnHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The greeting counts as the agent's opening line.
    pub fn push_greeting(&mut self, greeting: &str) {
        self.push(Role::Assistant, greeting);
    }

    /// Record a completed exchange. Both sides are appended together so the
    /// history never holds an unanswered user line.
    pub fn push_exchange(&mut self, user_text: &str, reply_text: &str) {
        self.push(Role::User, user_text);
        self.push(Role::Assistant, reply_text);
    }

    fn push(&mut self, role: Role, text: &str) {
        self.turns.push(Turn {
            role,
            text: text.to_string(),
            at_ms: now_ms(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Snapshot handed to the reasoning stage.
    pub fn as_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|t| ChatMessage::new(t.role, t.text.clone()))
            .collect()
    }
}
