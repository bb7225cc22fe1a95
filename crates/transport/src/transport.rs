use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use chicken_core::{ChatMessage, ExchangeContext, SessionMeta};

use crate::cancel::CancelToken;
use crate::event::SessionEvent;

/// Stream of decoded events for one exchange.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SessionEvent, TransportError>> + Send>>;

/// Everything needed to open one streaming exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub session_id: String,
    pub message: String,
    pub agent_type: String,
    pub context: ExchangeContext,
}

/// A window of history returned by the messages endpoint, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
    /// Cursor to pass as `before` to fetch the next older page.
    pub oldest_cursor: Option<String>,
}

/// Backend session API as seen by the streaming coordinator.
///
/// The HTTP implementation lives in [`crate::client`]; tests use
/// [`mock::MockTransport`].
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Append a user message and stream the assistant's reply.
    ///
    /// The token aborts the request while it is being sent; once the stream
    /// is returned the caller is responsible for racing reads against it.
    async fn open_stream(
        &self,
        request: StreamRequest,
        cancel: CancelToken,
    ) -> Result<EventStream, TransportError>;

    /// Fetch up to `limit` messages strictly older than `before` (newest
    /// window when `before` is `None`).
    async fn fetch_messages(
        &self,
        session_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<HistoryPage, TransportError>;

    /// Persist a session title.
    async fn update_title(&self, session_id: &str, title: &str) -> Result<(), TransportError>;

    /// List sessions known to the backend, newest first.
    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, TransportError>;

    /// Delete a session and its history.
    async fn delete_session(&self, session_id: &str) -> Result<(), TransportError>;

    /// Transport name for logging/debugging.
    fn transport_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Stream idle for {0:?}")]
    IdleTimeout(Duration),
    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Scriptable transport for exercising the coordinator without a backend.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    enum Script {
        Events(Vec<Result<SessionEvent, TransportError>>),
        Channel(mpsc::UnboundedReceiver<Result<SessionEvent, TransportError>>),
        Fail(TransportError),
        Stall,
    }

    /// Feeds a queued channel-backed stream. Dropping it ends the stream.
    #[derive(Clone)]
    pub struct MockStreamSender {
        tx: mpsc::UnboundedSender<Result<SessionEvent, TransportError>>,
    }

    impl MockStreamSender {
        pub fn send(&self, event: SessionEvent) {
            let _ = self.tx.send(Ok(event));
        }

        pub fn content(&self, text: &str) {
            self.send(SessionEvent::content(text));
        }

        pub fn keep_alive(&self) {
            self.send(SessionEvent::KeepAlive);
        }

        pub fn fail(&self, error: TransportError) {
            let _ = self.tx.send(Err(error));
        }
    }

    /// A transport that replays queued scripts in FIFO order, one per
    /// `open_stream` call, and records every call it receives.
    #[derive(Default)]
    pub struct MockTransport {
        scripts: Mutex<VecDeque<Script>>,
        pages: Mutex<VecDeque<Result<HistoryPage, TransportError>>>,
        sessions: Mutex<Vec<SessionMeta>>,
        requests: Mutex<Vec<StreamRequest>>,
        tokens: Mutex<Vec<CancelToken>>,
        titles: Mutex<Vec<(String, String)>>,
        fetches: Mutex<Vec<(String, Option<String>, u32)>>,
        deleted: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a stream that yields `events` and then closes.
        pub fn queue_events(&self, events: Vec<SessionEvent>) {
            self.scripts
                .lock()
                .unwrap()
                .push_back(Script::Events(events.into_iter().map(Ok).collect()));
        }

        /// Queue a stream that yields `items`, including mid-stream errors.
        pub fn queue_results(&self, items: Vec<Result<SessionEvent, TransportError>>) {
            self.scripts.lock().unwrap().push_back(Script::Events(items));
        }

        /// Queue an `open_stream` call that fails before streaming.
        pub fn queue_failure(&self, error: TransportError) {
            self.scripts.lock().unwrap().push_back(Script::Fail(error));
        }

        /// Queue an `open_stream` call that never answers until cancelled.
        pub fn queue_stall(&self) {
            self.scripts.lock().unwrap().push_back(Script::Stall);
        }

        /// Queue a stream driven by the returned sender.
        pub fn queue_channel(&self) -> MockStreamSender {
            let (tx, rx) = mpsc::unbounded_channel();
            self.scripts.lock().unwrap().push_back(Script::Channel(rx));
            MockStreamSender { tx }
        }

        pub fn queue_page(&self, page: Result<HistoryPage, TransportError>) {
            self.pages.lock().unwrap().push_back(page);
        }

        pub fn set_sessions(&self, sessions: Vec<SessionMeta>) {
            *self.sessions.lock().unwrap() = sessions;
        }

        pub fn requests(&self) -> Vec<StreamRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// Cancellation tokens handed to each `open_stream` call, in order.
        pub fn tokens(&self) -> Vec<CancelToken> {
            self.tokens.lock().unwrap().clone()
        }

        pub fn titles(&self) -> Vec<(String, String)> {
            self.titles.lock().unwrap().clone()
        }

        pub fn fetches(&self) -> Vec<(String, Option<String>, u32)> {
            self.fetches.lock().unwrap().clone()
        }

        pub fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionTransport for MockTransport {
        async fn open_stream(
            &self,
            request: StreamRequest,
            cancel: CancelToken,
        ) -> Result<EventStream, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.tokens.lock().unwrap().push(cancel.clone());

            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Events(items)) => Ok(Box::pin(stream::iter(items))),
                Some(Script::Channel(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                }))),
                Some(Script::Fail(error)) => Err(error),
                Some(Script::Stall) => {
                    cancel.cancelled().await;
                    Err(TransportError::Cancelled)
                }
                None => Ok(Box::pin(stream::empty())),
            }
        }

        async fn fetch_messages(
            &self,
            session_id: &str,
            before: Option<&str>,
            limit: u32,
        ) -> Result<HistoryPage, TransportError> {
            self.fetches.lock().unwrap().push((
                session_id.to_string(),
                before.map(String::from),
                limit,
            ));
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HistoryPage::default()))
        }

        async fn update_title(&self, session_id: &str, title: &str) -> Result<(), TransportError> {
            self.titles
                .lock()
                .unwrap()
                .push((session_id.to_string(), title.to_string()));
            Ok(())
        }

        async fn list_sessions(&self) -> Result<Vec<SessionMeta>, TransportError> {
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn delete_session(&self, session_id: &str) -> Result<(), TransportError> {
            self.deleted.lock().unwrap().push(session_id.to_string());
            Ok(())
        }

        fn transport_name(&self) -> &str {
            "mock"
        }
    }
}
