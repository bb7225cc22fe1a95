//! Session list metadata (titles, counters, timestamps).

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use chicken_core::{SessionMeta, DEFAULT_AGENT_TYPE};
use chicken_transport::SessionTransport;

use crate::error::SessionError;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// In-memory session directory; the session list UI reads from here.
pub struct SessionDirectory {
    sessions: RwLock<HashMap<String, SessionMeta>>,
    changes: broadcast::Sender<String>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            sessions: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Register a brand new, empty session with a generated id.
    pub fn create(&self, agent_type: Option<&str>) -> SessionMeta {
        let mut meta = SessionMeta::new(Uuid::new_v4().to_string());
        meta.agent_type = agent_type.unwrap_or(DEFAULT_AGENT_TYPE).to_string();
        self.insert(meta.clone());
        info!(session_id = %meta.id, agent_type = %meta.agent_type, "session created");
        meta
    }

    pub fn insert(&self, meta: SessionMeta) {
        let id = meta.id.clone();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), meta);
        let _ = self.changes.send(id);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionMeta> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    /// Mutate a session's metadata in place. Returns the updated copy, or
    /// `None` for an unknown session.
    pub fn update(&self, session_id: &str, f: impl FnOnce(&mut SessionMeta)) -> Option<SessionMeta> {
        let updated = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let meta = sessions.get_mut(session_id)?;
            f(meta);
            meta.clone()
        };
        let _ = self.changes.send(session_id.to_string());
        Some(updated)
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionMeta> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if removed.is_some() {
            let _ = self.changes.send(session_id.to_string());
        }
        removed
    }

    /// All sessions, most recently updated first.
    pub fn list(&self) -> Vec<SessionMeta> {
        let mut sessions: Vec<SessionMeta> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Merge the backend's session list into the directory.
    ///
    /// Local entries with a newer `updated_at` (an exchange finished after
    /// the backend snapshot) are kept as they are.
    pub async fn refresh_from(&self, transport: &dyn SessionTransport) -> Result<usize, SessionError> {
        let remote = transport.list_sessions().await?;
        let count = remote.len();
        let mut changed = Vec::with_capacity(count);
        {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            for meta in remote {
                match sessions.get(&meta.id) {
                    Some(local) if local.updated_at > meta.updated_at => {}
                    _ => {
                        changed.push(meta.id.clone());
                        sessions.insert(meta.id.clone(), meta);
                    }
                }
            }
        }
        for id in changed {
            let _ = self.changes.send(id);
        }
        debug!(count, transport = transport.transport_name(), "session directory refreshed");
        Ok(count)
    }

    /// Delete on the backend, then locally.
    pub async fn delete(&self, transport: &dyn SessionTransport, session_id: &str) -> Result<(), SessionError> {
        transport.delete_session(session_id).await?;
        self.remove(session_id);
        info!(session_id = %session_id, "session deleted");
        Ok(())
    }

    /// Receives the id of every session whose metadata changed.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

impl Default for SessionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chicken_transport::mock::MockTransport;

    #[test]
    fn test_create_registers_empty_session() {
        let dir = SessionDirectory::new();
        let meta = dir.create(Some("search"));
        assert_eq!(dir.get(&meta.id), Some(meta.clone()));
        assert_eq!(meta.agent_type, "search");
        assert!(meta.is_empty());
    }

    #[test]
    fn test_update_unknown_session_is_none() {
        let dir = SessionDirectory::new();
        assert!(dir.update("nope", |m| m.message_count = 3).is_none());
    }

    #[test]
    fn test_list_orders_by_recency() {
        let dir = SessionDirectory::new();
        let mut old = SessionMeta::new("old");
        old.updated_at = 1;
        let mut new = SessionMeta::new("new");
        new.updated_at = 2;
        dir.insert(old);
        dir.insert(new);
        let ids: Vec<_> = dir.list().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_newer_local_entries() {
        let dir = SessionDirectory::new();
        let mut local = SessionMeta::new("a");
        local.updated_at = 500;
        local.message_count = 4;
        dir.insert(local);

        let mut remote_a = SessionMeta::new("a");
        remote_a.updated_at = 100;
        remote_a.message_count = 2;
        let mut remote_b = SessionMeta::new("b");
        remote_b.title = "Remote".into();

        let transport = MockTransport::new();
        transport.set_sessions(vec![remote_a, remote_b]);

        assert_eq!(dir.refresh_from(&transport).await.unwrap(), 2);
        assert_eq!(dir.get("a").unwrap().message_count, 4);
        assert_eq!(dir.get("b").unwrap().title, "Remote");
    }

    #[tokio::test]
    async fn test_delete_calls_backend() {
        let dir = SessionDirectory::new();
        let meta = dir.create(None);
        let transport = MockTransport::new();

        dir.delete(&transport, &meta.id).await.unwrap();
        assert!(!dir.contains(&meta.id));
        assert_eq!(transport.deleted(), vec![meta.id]);
    }
}
