use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Sender used for messages the server writes itself.
pub const SYSTEM_SENDER: &str = "system";

/// Longest message kept; longer input is cut.
pub const MAX_MESSAGE_CHARS: usize = 200;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_code: String,
    pub from: String,
    pub text: String,
}

impl ChatMessage {
    pub fn system(room_code: &str, text: impl Into<String>) -> Self {
        Self {
            room_code: room_code.to_string(),
            from: SYSTEM_SENDER.to_string(),
            text: text.into(),
        }
    }
}

/// Rolling history replayed to joiners. Older messages are gone for good.
#[derive(Debug, Clone)]
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
    limit: usize,
}

impl ChatLog {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(limit.min(256)),
            limit,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        if self.limit == 0 {
            return;
        }
        while self.messages.len() >= self.limit {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

pub fn truncate_message(text: &str) -> String {
    text.trim().chars().take(MAX_MESSAGE_CHARS).collect()
}
