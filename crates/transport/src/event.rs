use serde::{Deserialize, Serialize};

/// Typed events decoded from the session stream.
///
/// The backend frames each as `{"type": ..., "data": ...}`; unknown types
/// are dropped during parsing and never reach this enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A text delta for the assistant message
    Content { text: String },
    /// Status text ("Reading documents...") that is not part of the transcript
    Progress { message: String },
    /// The backend gave up on this exchange
    Error { message: String },
    /// Bytes arrived but carried no event (comments, unknown types). Only
    /// keeps the idle timer alive.
    KeepAlive,
}

impl SessionEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn progress(message: impl Into<String>) -> Self {
        Self::Progress {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends the exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
