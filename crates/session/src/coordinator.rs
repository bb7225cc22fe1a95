//! Streaming coordinator: turns a submitted user message into a live,
//! cancellable exchange against the backend and keeps the store, the session
//! directory and [`StreamingState`] consistent while it runs.
//!
//! At most one exchange is active. Starting a new one cancels the previous
//! exchange before anything is written for the new one. All writes an
//! exchange makes happen while holding the coordinator's lock and only
//! after re-checking that its token is still live, so a superseded or
//! stopped exchange can never touch the transcript again.
//!
//! Lock order: coordinator, then store or directory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chicken_core::{
    derive_title, now_millis, ChatMessage, Config, ExchangeContext, MentionDocument, SessionMeta,
    DEFAULT_AGENT_TYPE,
};
use chicken_transport::{
    CancelToken, EventStream, SessionEvent, SessionTransport, StreamRequest, TransportError,
};

use crate::directory::SessionDirectory;
use crate::state::{StreamingState, StreamingStatePublisher};
use crate::store::SessionMessageStore;

/// Shown in the assistant message when the transport fails.
pub const TRANSPORT_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while contacting the assistant. Please try again.";

/// User message content for a submission that only carries attachments.
pub const ATTACHMENT_ONLY_MARKER: &str = "[attached documents]";

/// Lifecycle of the active exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Streaming,
    Finalizing,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Agent used when the session does not name one.
    pub agent_type: String,
    /// Give up on a stream that sends nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            agent_type: DEFAULT_AGENT_TYPE.to_string(),
            idle_timeout: None,
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            agent_type: config.backend.agent_type.clone(),
            idle_timeout: config.streaming.idle_timeout(),
        }
    }
}

/// Record of the exchange that currently owns [`StreamingState`].
struct ActiveExchange {
    id: u64,
    session_id: String,
    token: CancelToken,
    phase: Phase,
}

/// Identity of one exchange, owned by its task.
struct Ticket {
    id: u64,
    session_id: String,
    placeholder_id: String,
    token: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

/// Transient context for the next submission.
#[derive(Default)]
struct PendingContext {
    mention_documents: Vec<MentionDocument>,
    model: Option<String>,
}

struct Inner {
    store: Arc<SessionMessageStore>,
    directory: Arc<SessionDirectory>,
    transport: Arc<dyn SessionTransport>,
    state: StreamingStatePublisher,
    options: CoordinatorOptions,
    active: Mutex<Option<ActiveExchange>>,
    pending: Mutex<PendingContext>,
    next_exchange: AtomicU64,
}

/// Handle to one accepted (or ignored) submission.
pub struct ExchangeHandle {
    exchange_id: Option<u64>,
    join: Option<JoinHandle<()>>,
}

impl ExchangeHandle {
    fn ignored() -> Self {
        Self {
            exchange_id: None,
            join: None,
        }
    }

    /// `None` when nothing was started (empty submission, no runtime).
    pub fn exchange_id(&self) -> Option<u64> {
        self.exchange_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait until the exchange has been finalized.
    pub async fn finished(self) {
        if let Some(join) = self.join {
            if let Err(e) = join.await {
                warn!(error = %e, "exchange task ended abnormally");
            }
        }
    }
}

#[derive(Clone)]
pub struct StreamingCoordinator {
    inner: Arc<Inner>,
}

impl StreamingCoordinator {
    pub fn new(
        store: Arc<SessionMessageStore>,
        directory: Arc<SessionDirectory>,
        transport: Arc<dyn SessionTransport>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                directory,
                transport,
                state: StreamingStatePublisher::new(),
                options,
                active: Mutex::new(None),
                pending: Mutex::new(PendingContext::default()),
                next_exchange: AtomicU64::new(1),
            }),
        }
    }

    pub fn store(&self) -> &Arc<SessionMessageStore> {
        &self.inner.store
    }

    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.inner.directory
    }

    /// Submit a user message and stream the reply in the background.
    ///
    /// Returns once the user message and the empty assistant placeholder are
    /// in the store; the network exchange runs on a spawned task. Failures
    /// never surface here: they end up in the placeholder's content. Outside
    /// a tokio runtime nothing is started.
    pub fn start(&self, session_id: &str, user_text: &str) -> ExchangeHandle {
        let inner = &self.inner;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %session_id, "no tokio runtime, submission dropped");
            return ExchangeHandle::ignored();
        };

        let has_text = !user_text.trim().is_empty();
        let context = {
            let mut pending = inner.pending();
            if !has_text && pending.mention_documents.is_empty() {
                debug!(session_id = %session_id, "ignoring empty submission");
                return ExchangeHandle::ignored();
            }
            ExchangeContext {
                mention_documents: std::mem::take(&mut pending.mention_documents),
                model: pending.model.clone(),
            }
        };
        let content = if has_text {
            user_text.to_string()
        } else {
            ATTACHMENT_ONLY_MARKER.to_string()
        };

        let mut active = inner.active();

        if let Some(previous) = active.take() {
            previous.token.cancel();
            inner.state.reset();
            info!(
                session_id = %previous.session_id,
                exchange_id = previous.id,
                "superseding active exchange"
            );
        }

        let meta = match inner.directory.get(session_id) {
            Some(meta) => meta,
            None => {
                warn!(session_id = %session_id, "starting exchange for unregistered session");
                let meta = SessionMeta::new(session_id);
                inner.directory.insert(meta.clone());
                meta
            }
        };
        let first_message = meta.is_empty();

        inner
            .store
            .modify(session_id, |block| block.append(ChatMessage::user(content.clone())));

        if first_message {
            let title = derive_title(&content);
            let now = now_millis();
            inner.directory.update(session_id, |m| {
                m.title = title.clone();
                m.created_at = now;
                m.updated_at = now;
                m.message_count = 1;
            });
            inner.spawn_title_update(session_id, title);
        }

        let placeholder = ChatMessage::assistant_placeholder();
        let placeholder_id = placeholder.id.clone();
        inner.store.modify(session_id, |block| block.append(placeholder));

        inner.state.set(StreamingState::streaming(session_id));

        let id = inner.next_exchange.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new();
        *active = Some(ActiveExchange {
            id,
            session_id: session_id.to_string(),
            token: token.clone(),
            phase: Phase::Starting,
        });
        drop(active);

        let ticket = Ticket {
            id,
            session_id: session_id.to_string(),
            placeholder_id,
            token,
        };
        let request = StreamRequest {
            session_id: session_id.to_string(),
            message: content,
            agent_type: if meta.agent_type.is_empty() {
                inner.options.agent_type.clone()
            } else {
                meta.agent_type
            },
            context,
        };

        info!(
            session_id = %session_id,
            exchange_id = id,
            agent_type = %request.agent_type,
            attachments = request.context.mention_documents.len(),
            "exchange started"
        );

        let task_inner = Arc::clone(inner);
        let join = runtime.spawn(async move {
            let outcome = task_inner.drive(&ticket, request).await;
            task_inner.finalize(&ticket, outcome);
        });

        ExchangeHandle {
            exchange_id: Some(id),
            join: Some(join),
        }
    }

    /// Cancel the active exchange, keeping whatever content already arrived.
    /// No-op when idle.
    pub fn stop(&self) {
        let mut active = self.inner.active();
        if let Some(exchange) = active.as_mut() {
            if !exchange.token.is_cancelled() {
                info!(
                    session_id = %exchange.session_id,
                    exchange_id = exchange.id,
                    "stopping exchange"
                );
            }
            exchange.token.cancel();
            exchange.phase = Phase::Finalizing;
        }
        self.inner.state.reset();
    }

    pub fn is_active_for(&self, session_id: &str) -> bool {
        self.inner.state.current().is_active_for(session_id)
    }

    pub fn progress(&self) -> Option<String> {
        self.inner.state.current().progress
    }

    pub fn state(&self) -> StreamingState {
        self.inner.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StreamingState> {
        self.inner.state.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.inner
            .active()
            .as_ref()
            .map_or(Phase::Idle, |exchange| exchange.phase)
    }

    /// Replace the documents attached to the next submission.
    pub fn set_mention_documents(&self, documents: Vec<MentionDocument>) {
        self.inner.pending().mention_documents = documents;
    }

    pub fn add_mention_document(&self, document: MentionDocument) {
        self.inner.pending().mention_documents.push(document);
    }

    /// Model sent with every following submission; `None` lets the backend
    /// choose.
    pub fn set_model_override(&self, model: Option<String>) {
        self.inner.pending().model = model;
    }

    /// Context the next `start` will send.
    pub fn pending_context(&self) -> ExchangeContext {
        let pending = self.inner.pending();
        ExchangeContext {
            mention_documents: pending.mention_documents.clone(),
            model: pending.model.clone(),
        }
    }
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, Option<ActiveExchange>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, PendingContext> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_title_update(&self, session_id: &str, title: String) {
        let transport = Arc::clone(&self.transport);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = transport.update_title(&session_id, &title).await {
                warn!(session_id = %session_id, error = %e, "failed to persist session title");
            }
        });
    }

    /// Guard for writes on behalf of `ticket`: `None` once the exchange has
    /// been stopped or superseded.
    fn owned(&self, ticket: &Ticket) -> Option<MutexGuard<'_, Option<ActiveExchange>>> {
        let active = self.active();
        let owns = active.as_ref().is_some_and(|a| a.id == ticket.id);
        (owns && !ticket.token.is_cancelled()).then_some(active)
    }

    async fn drive(&self, ticket: &Ticket, request: StreamRequest) -> Outcome {
        let token = &ticket.token;

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Outcome::Cancelled,
            opened = self.open(request, token.clone()) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.fail(ticket, e),
        };

        match self.owned(ticket) {
            Some(mut active) => {
                if let Some(exchange) = active.as_mut() {
                    exchange.phase = Phase::Streaming;
                }
            }
            None => return Outcome::Cancelled,
        }
        debug!(
            session_id = %ticket.session_id,
            exchange_id = ticket.id,
            transport = self.transport.transport_name(),
            "stream open"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Outcome::Cancelled,
                next = self.next_event(&mut stream) => next,
            };
            match next {
                Some(Ok(event)) => {
                    if let Some(outcome) = self.apply(ticket, event) {
                        return outcome;
                    }
                }
                Some(Err(e)) => return self.fail(ticket, e),
                None => return Outcome::Completed,
            }
        }
    }

    /// The idle window also covers waiting for the response headers.
    async fn open(
        &self,
        request: StreamRequest,
        token: CancelToken,
    ) -> Result<EventStream, TransportError> {
        let opening = self.transport.open_stream(request, token);
        match self.options.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, opening)
                .await
                .unwrap_or(Err(TransportError::IdleTimeout(limit))),
            None => opening.await,
        }
    }

    /// Any item resets the idle window, [`SessionEvent::KeepAlive`] included.
    async fn next_event(
        &self,
        stream: &mut EventStream,
    ) -> Option<Result<SessionEvent, TransportError>> {
        match self.options.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(TransportError::IdleTimeout(limit))),
            },
            None => stream.next().await,
        }
    }

    /// Apply one event. Returns the outcome when the event ends the exchange.
    fn apply(&self, ticket: &Ticket, event: SessionEvent) -> Option<Outcome> {
        let Some(_active) = self.owned(ticket) else {
            return Some(Outcome::Cancelled);
        };

        match event {
            SessionEvent::Content { text } => {
                self.write_placeholder(ticket, |content| content.push_str(&text));
                self.state.set_progress(None);
                None
            }
            SessionEvent::Progress { message } => {
                self.state.set_progress(Some(message));
                None
            }
            SessionEvent::KeepAlive => None,
            SessionEvent::Error { message } => {
                warn!(
                    session_id = %ticket.session_id,
                    exchange_id = ticket.id,
                    error = %message,
                    "backend reported an error"
                );
                self.write_placeholder(ticket, |content| *content = format!("Error: {message}"));
                Some(Outcome::Failed)
            }
        }
    }

    /// Transport-level failure. A cancelled exchange keeps its content.
    fn fail(&self, ticket: &Ticket, error: TransportError) -> Outcome {
        if error.is_cancelled() {
            return Outcome::Cancelled;
        }
        let Some(_active) = self.owned(ticket) else {
            return Outcome::Cancelled;
        };
        warn!(
            session_id = %ticket.session_id,
            exchange_id = ticket.id,
            error = %error,
            "exchange failed"
        );
        self.write_placeholder(ticket, |content| {
            *content = TRANSPORT_FAILURE_MESSAGE.to_string();
        });
        Outcome::Failed
    }

    /// Caller holds the coordinator lock.
    fn write_placeholder(&self, ticket: &Ticket, f: impl FnOnce(&mut String)) {
        let found = self.store.modify(&ticket.session_id, |block| {
            block.update_message(&ticket.placeholder_id, |m| f(&mut m.content))
        });
        if !found {
            debug!(
                session_id = %ticket.session_id,
                placeholder_id = %ticket.placeholder_id,
                "placeholder no longer in local window"
            );
        }
    }

    /// Runs exactly once per accepted submission, whatever the outcome.
    fn finalize(&self, ticket: &Ticket, outcome: Outcome) {
        let mut active = self.active();

        let owns = active.as_ref().is_some_and(|a| a.id == ticket.id);
        if owns {
            if let Some(exchange) = active.as_mut() {
                exchange.phase = Phase::Finalizing;
            }
            self.state.reset();
            *active = None;
        }

        let now = now_millis();
        // The first exchange was counted as 1 in `start`, so this lands on 2.
        let meta = self.directory.update(&ticket.session_id, |m| {
            m.updated_at = now;
            m.message_count += 1;
        });
        drop(active);

        info!(
            session_id = %ticket.session_id,
            exchange_id = ticket.id,
            outcome = ?outcome,
            superseded = !owns,
            message_count = meta.map(|m| m.message_count),
            "exchange finalized"
        );
    }
}
