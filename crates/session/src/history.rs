//! Paginated history loading into the message store.

use std::sync::Arc;

use tracing::{debug, info};

use chicken_transport::SessionTransport;

use crate::error::SessionError;
use crate::store::{SessionMessageStore, SessionMessagesBlock, MAX_BLOCK_MESSAGES};

pub struct HistoryLoader {
    store: Arc<SessionMessageStore>,
    transport: Arc<dyn SessionTransport>,
    page_size: u32,
}

impl HistoryLoader {
    pub fn new(store: Arc<SessionMessageStore>, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            store,
            transport,
            page_size: MAX_BLOCK_MESSAGES as u32,
        }
    }

    /// Page size for every fetch; clamped to the block cap.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_BLOCK_MESSAGES as u32);
        self
    }

    /// Replace the session's window with its newest page.
    pub async fn load_latest(
        &self,
        session_id: &str,
    ) -> Result<Arc<SessionMessagesBlock>, SessionError> {
        let page = self
            .transport
            .fetch_messages(session_id, None, self.page_size)
            .await?;
        info!(
            session_id = %session_id,
            messages = page.messages.len(),
            has_more = page.has_more,
            "loaded latest history"
        );
        Ok(self
            .store
            .set(session_id, move |_| SessionMessagesBlock::from_page(page)))
    }

    /// Fetch the page before the current window and merge it in.
    ///
    /// Returns how many messages the backend sent; zero without a request
    /// when the window already reaches the start of the session.
    pub async fn fetch_older(&self, session_id: &str) -> Result<usize, SessionError> {
        let block = self
            .store
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        if !block.has_more {
            debug!(session_id = %session_id, "no older history");
            return Ok(0);
        }

        let cursor = block
            .oldest_cursor
            .clone()
            .or_else(|| block.messages.first().map(|m| m.timestamp.to_string()));
        let page = self
            .transport
            .fetch_messages(session_id, cursor.as_deref(), self.page_size)
            .await?;
        let fetched = page.messages.len();

        self.store.modify(session_id, move |b| b.prepend_older(page));
        debug!(session_id = %session_id, fetched, "merged older history");
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chicken_core::ChatMessage;
    use chicken_transport::mock::MockTransport;
    use chicken_transport::{HistoryPage, TransportError};

    fn loader(transport: Arc<MockTransport>) -> (HistoryLoader, Arc<SessionMessageStore>) {
        let store = Arc::new(SessionMessageStore::new());
        (HistoryLoader::new(Arc::clone(&store), transport), store)
    }

    fn messages(names: &[&str]) -> Vec<ChatMessage> {
        names.iter().map(|n| ChatMessage::user(*n)).collect()
    }

    #[tokio::test]
    async fn test_load_latest_then_older() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_page(Ok(HistoryPage {
            messages: messages(&["c", "d"]),
            has_more: true,
            oldest_cursor: Some("300".into()),
        }));
        transport.queue_page(Ok(HistoryPage {
            messages: messages(&["a", "b"]),
            has_more: false,
            oldest_cursor: Some("100".into()),
        }));
        let (loader, store) = loader(Arc::clone(&transport));

        loader.load_latest("s1").await.unwrap();
        assert_eq!(loader.fetch_older("s1").await.unwrap(), 2);
        // Window now reaches the start; no further request.
        assert_eq!(loader.fetch_older("s1").await.unwrap(), 0);

        let block = store.get("s1").unwrap();
        let contents: Vec<_> = block.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c", "d"]);
        assert!(!block.has_more);

        let fetches = transport.fetches();
        assert_eq!(fetches.len(), 2);
        assert_eq!(fetches[0], ("s1".to_string(), None, 200));
        assert_eq!(fetches[1], ("s1".to_string(), Some("300".to_string()), 200));
    }

    #[tokio::test]
    async fn test_fetch_older_unknown_session() {
        let (loader, _) = loader(Arc::new(MockTransport::new()));
        assert!(matches!(
            loader.fetch_older("ghost").await,
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_block_untouched() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_page(Ok(HistoryPage {
            messages: messages(&["x"]),
            has_more: true,
            oldest_cursor: Some("5".into()),
        }));
        transport.queue_page(Err(TransportError::Network("refused".into())));
        let (loader, store) = loader(Arc::clone(&transport));

        loader.load_latest("s1").await.unwrap();
        let before = store.get("s1").unwrap();
        assert!(matches!(
            loader.fetch_older("s1").await,
            Err(SessionError::Transport(TransportError::Network(_)))
        ));
        assert_eq!(store.get("s1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_page_size_is_clamped() {
        let transport = Arc::new(MockTransport::new());
        let (loader, _) = loader(Arc::clone(&transport));
        let loader = loader.with_page_size(5000);
        loader.load_latest("s1").await.unwrap();
        assert_eq!(transport.fetches()[0].2, 200);
    }
}
