//! Per-channel conversation history.

mod store;

pub use store::{DEFAULT_HISTORY_LIMIT, HistoryError, HistoryStore};

use crate::provider::{ChatMessage, Role};

/// Who a persisted turn is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: String,
}

impl Author {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One stored message in a channel's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Insertion order; strictly increasing within a channel.
    pub sequence: i64,
    pub channel_id: u64,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub message: ChatMessage,
    /// Unix seconds.
    pub created_at: i64,
}

impl Turn {
    pub fn role(&self) -> Role {
        self.message.role()
    }

    pub fn content(&self) -> &str {
        self.message.content()
    }
}

impl AsRef<ChatMessage> for Turn {
    fn as_ref(&self) -> &ChatMessage {
        &self.message
    }
}

impl From<Turn> for ChatMessage {
    fn from(turn: Turn) -> Self {
        turn.message
    }
}
