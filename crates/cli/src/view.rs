//! Diffing store snapshots into terminal output.

use std::collections::HashMap;

use chicken_core::Role;
use chicken_session::SessionMessagesBlock;

/// What changed in the focused transcript since the last render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    /// A message that has not been shown before.
    Message { role: Role, content: String },
    /// Text appended to a message already on screen.
    Delta(String),
    /// A message whose content was replaced rather than extended.
    Replaced(String),
}

/// Tracks what has been printed for one session.
#[derive(Debug, Default)]
pub struct TranscriptView {
    shown: HashMap<String, String>,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark everything in `block` as already on screen.
    pub fn mark_shown(&mut self, block: &SessionMessagesBlock) {
        for message in &block.messages {
            self.shown.insert(message.id.clone(), message.content.clone());
        }
    }

    pub fn clear(&mut self) {
        self.shown.clear();
    }

    /// Updates needed to bring the screen in line with `block`.
    ///
    /// User messages are echoed by the terminal itself, so new ones are only
    /// recorded.
    pub fn diff(&mut self, block: &SessionMessagesBlock) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        for message in &block.messages {
            match self.shown.get_mut(&message.id) {
                None => {
                    if message.role != Role::User {
                        updates.push(ViewUpdate::Message {
                            role: message.role,
                            content: message.content.clone(),
                        });
                    }
                    self.shown.insert(message.id.clone(), message.content.clone());
                }
                Some(shown) if *shown == message.content => {}
                Some(shown) => {
                    match message.content.strip_prefix(shown.as_str()) {
                        Some(delta) => updates.push(ViewUpdate::Delta(delta.to_string())),
                        None => updates.push(ViewUpdate::Replaced(message.content.clone())),
                    }
                    *shown = message.content.clone();
                }
            }
        }
        updates
    }
}
