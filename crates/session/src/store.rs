//! Per-session message cache.
//!
//! Each session maps to an immutable [`SessionMessagesBlock`] behind an
//! `Arc`. Every mutation builds a new block and swaps it in, so a reader
//! holding an older snapshot never sees a half-applied update.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use chicken_core::ChatMessage;
use chicken_transport::HistoryPage;

/// Upper bound on locally held messages per session.
pub const MAX_BLOCK_MESSAGES: usize = 200;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Bounded local window of a session's history, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMessagesBlock {
    pub messages: Vec<ChatMessage>,
    /// Opaque cursor for fetching the page before `messages[0]`.
    pub oldest_cursor: Option<String>,
    /// Whether the backend holds messages older than this window.
    pub has_more: bool,
}

impl SessionMessagesBlock {
    /// Block holding the newest page of a session.
    pub fn from_page(page: HistoryPage) -> Self {
        let mut messages = page.messages;
        let mut has_more = page.has_more;
        if messages.len() > MAX_BLOCK_MESSAGES {
            let excess = messages.len() - MAX_BLOCK_MESSAGES;
            messages.drain(..excess);
            has_more = true;
        }
        Self {
            messages,
            oldest_cursor: page.oldest_cursor,
            has_more,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Append at the newest end.
    ///
    /// At capacity the oldest local message is evicted; it is still on the
    /// backend, so the window is marked as having more and the cursor moves to
    /// the new oldest message.
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() > MAX_BLOCK_MESSAGES {
            let excess = self.messages.len() - MAX_BLOCK_MESSAGES;
            self.messages.drain(..excess);
            self.has_more = true;
            self.oldest_cursor = self.messages.first().map(|m| m.timestamp.to_string());
        }
    }

    /// Apply `f` to the message with `id`. Returns false if it is not in the
    /// window.
    pub fn update_message(&mut self, id: &str, f: impl FnOnce(&mut ChatMessage)) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    /// Merge an older page in front of the current window.
    ///
    /// Order stays oldest to newest. If the result exceeds
    /// [`MAX_BLOCK_MESSAGES`] it is cut from the newest end.
    pub fn prepend_older(&mut self, page: HistoryPage) {
        let mut combined = page.messages;
        combined.append(&mut self.messages);
        combined.truncate(MAX_BLOCK_MESSAGES);
        self.messages = combined;
        self.has_more = page.has_more;
        self.oldest_cursor = page.oldest_cursor;
    }

    /// Replace the window with the newest page.
    pub fn replace_latest(&mut self, page: HistoryPage) {
        *self = Self::from_page(page);
    }
}

/// Notification sent after a session's block changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Updated(String),
    Removed(String),
}

impl StoreChange {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Updated(id) | Self::Removed(id) => id,
        }
    }
}

/// Shared-read message store keyed by session id.
pub struct SessionMessageStore {
    blocks: RwLock<HashMap<String, Arc<SessionMessagesBlock>>>,
    changes: broadcast::Sender<StoreChange>,
}

impl SessionMessageStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            blocks: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Current snapshot, if the session has been touched.
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionMessagesBlock>> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Read-modify-write with a functional updater. An empty block is
    /// created on first use.
    pub fn set<F>(&self, session_id: &str, updater: F) -> Arc<SessionMessagesBlock>
    where
        F: FnOnce(&SessionMessagesBlock) -> SessionMessagesBlock,
    {
        let next = {
            let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
            let current = blocks.get(session_id).cloned().unwrap_or_default();
            let next = Arc::new(updater(&current));
            blocks.insert(session_id.to_string(), Arc::clone(&next));
            next
        };
        self.notify_updated(session_id, next.len());
        next
    }

    /// Clone the current block, mutate the copy, and publish it.
    pub fn modify<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionMessagesBlock) -> R) -> R {
        let (out, len) = {
            let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = blocks
                .get(session_id)
                .map(|b| (**b).clone())
                .unwrap_or_default();
            let out = f(&mut next);
            let len = next.len();
            blocks.insert(session_id.to_string(), Arc::new(next));
            (out, len)
        };
        self.notify_updated(session_id, len);
        out
    }

    fn notify_updated(&self, session_id: &str, len: usize) {
        trace!(session_id = %session_id, messages = len, "store block replaced");
        let _ = self.changes.send(StoreChange::Updated(session_id.to_string()));
    }

    /// Make sure a block exists without notifying.
    pub fn ensure(&self, session_id: &str) -> Arc<SessionMessagesBlock> {
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(blocks.entry(session_id.to_string()).or_default())
    }

    /// Drop the cached block for a deleted session.
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionMessagesBlock>> {
        let removed = self
            .blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if removed.is_some() {
            debug!(session_id = %session_id, "store block removed");
            let _ = self.changes.send(StoreChange::Removed(session_id.to_string()));
        }
        removed
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

impl Default for SessionMessageStore {
    fn default() -> Self {
        Self::new()
    }
}
