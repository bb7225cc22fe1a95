use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch, the timestamp unit used by the backend.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One turn in a conversation.
///
/// `id` is only unique within its session. Assistant messages have their
/// `content` appended to while a stream is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    /// Create a message with a fresh id, stamped now.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Empty assistant message that a stream fills in.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }
}

/// A user-attached reference document sent as side-channel context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionDocument {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MentionDocument {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            key: None,
            content: None,
            source: None,
        }
    }
}

/// Per-exchange context attached to a single submission.
///
/// Serialized as the request's `context` object; the backend reads
/// `mention_documents` and an optional `model` override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mention_documents: Vec<MentionDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ExchangeContext {
    pub fn is_empty(&self) -> bool {
        self.mention_documents.is_empty() && self.model.is_none()
    }

    pub fn has_attachments(&self) -> bool {
        !self.mention_documents.is_empty()
    }
}
