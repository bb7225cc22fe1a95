use serde::{Deserialize, Serialize};

use crate::message::now_millis;

/// Title given to a session before its first message.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Default agent that answers a session.
pub const DEFAULT_AGENT_TYPE: &str = "chat";

/// Maximum number of characters kept from the first user message as a title.
pub const TITLE_MAX_CHARS: usize = 50;

/// Session-list metadata for one conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub title: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
    /// Milliseconds since epoch.
    pub updated_at: i64,
    pub message_count: usize,
    pub agent_type: String,
}

impl SessionMeta {
    /// A fresh, empty session.
    pub fn new(id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            message_count: 0,
            agent_type: DEFAULT_AGENT_TYPE.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }
}

/// Derive a session title from the first user message.
///
/// Keeps the first [`TITLE_MAX_CHARS`] characters and appends `...` when the
/// message was longer.
pub fn derive_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}
