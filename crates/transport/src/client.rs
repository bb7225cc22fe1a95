//! HTTP client for the backend session API.
//!
//! Streaming goes through `POST /sessions/{id}/stream`, whose
//! `text/event-stream` body is decoded by [`SseEventStream`]. History,
//! titles and the session list are plain JSON endpoints.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use chicken_core::config::BackendConfig;
use chicken_core::{
    ChatMessage, ExchangeContext, Role, SessionMeta, DEFAULT_AGENT_TYPE, DEFAULT_SESSION_TITLE,
};

use crate::cancel::CancelToken;
use crate::event::SessionEvent;
use crate::sse::{parse_event, SseDecoder, SseFrame};
use crate::transport::{EventStream, HistoryPage, SessionTransport, StreamRequest, TransportError};

/// reqwest-backed [`SessionTransport`].
pub struct HttpSessionTransport {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

/// Request body for streaming.
#[derive(Serialize)]
struct StreamRequestBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a ExchangeContext>,
}

#[derive(Deserialize)]
struct RemoteMessage {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    timestamp: Option<f64>,
}

#[derive(Deserialize)]
struct RemotePage {
    #[serde(default)]
    messages: Vec<RemoteMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    oldest: Option<Value>,
}

#[derive(Deserialize)]
struct RemoteSessionList {
    #[serde(default)]
    sessions: Vec<RemoteSession>,
}

#[derive(Deserialize)]
struct RemoteSession {
    session_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    message_count: Option<usize>,
    #[serde(default)]
    agent_type: Option<String>,
}

impl HttpSessionTransport {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(&config.url).with_request_timeout(config.request_timeout())
    }

    /// Timeout applied to every call except the stream itself.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the backend is reachable.
    pub async fn health_check(&self) -> Result<(), TransportError> {
        let url = format!("{}/sessions", self.base_url);
        self.http
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(())
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::Api { status, body })
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn open_stream(
        &self,
        request: StreamRequest,
        cancel: CancelToken,
    ) -> Result<EventStream, TransportError> {
        let url = format!("{}/sessions/{}/stream", self.base_url, request.session_id);
        let body = StreamRequestBody {
            message: &request.message,
            context: (!request.context.is_empty()).then_some(&request.context),
        };

        debug!(
            session_id = %request.session_id,
            agent_type = %request.agent_type,
            url = %url,
            "opening session stream"
        );

        let send = self
            .http
            .post(&url)
            .query(&[("agent_type", request.agent_type.as_str())])
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            resp = send => resp.map_err(|e| TransportError::Network(e.to_string()))?,
        };
        let resp = Self::check_status(resp).await?;

        Ok(Box::pin(SseEventStream::new(Box::pin(resp.bytes_stream()))))
    }

    async fn fetch_messages(
        &self,
        session_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<HistoryPage, TransportError> {
        let url = format!("{}/sessions/{}/messages", self.base_url, session_id);
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = before {
            query.push(("before", cursor.to_string()));
        }

        let resp = self
            .http
            .get(&url)
            .query(&query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let resp = Self::check_status(resp).await?;

        let page: RemotePage = resp
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        Ok(HistoryPage {
            messages: page.messages.into_iter().map(into_chat_message).collect(),
            has_more: page.has_more,
            oldest_cursor: page.oldest.and_then(cursor_from_value),
        })
    }

    async fn update_title(&self, session_id: &str, title: &str) -> Result<(), TransportError> {
        let url = format!("{}/sessions/{}/title", self.base_url, session_id);
        let resp = self
            .http
            .post(&url)
            .query(&[("title", title)])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, TransportError> {
        let url = format!("{}/sessions", self.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let resp = Self::check_status(resp).await?;

        let list: RemoteSessionList = resp
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        Ok(list.sessions.into_iter().map(into_session_meta).collect())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), TransportError> {
        let url = format!("{}/sessions/{}", self.base_url, session_id);
        let resp = self
            .http
            .delete(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::check_status(resp).await?;
        Ok(())
    }

    fn transport_name(&self) -> &str {
        "http"
    }
}

fn into_chat_message(remote: RemoteMessage) -> ChatMessage {
    let mut msg = ChatMessage::new(remote.role, remote.content);
    if let Some(ts) = remote.timestamp {
        msg.timestamp = ts.round() as i64;
    }
    msg
}

/// The backend's `oldest` is a unix-ms number; keep it opaque as a string.
fn cursor_from_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn into_session_meta(remote: RemoteSession) -> SessionMeta {
    let created_at = remote.created_at.as_deref().and_then(parse_timestamp);
    let updated_at = remote.updated_at.as_deref().and_then(parse_timestamp);
    let mut meta = SessionMeta::new(remote.session_id);
    meta.title = remote
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string());
    if let Some(ts) = created_at {
        meta.created_at = ts;
    }
    meta.updated_at = updated_at.unwrap_or(meta.created_at);
    meta.message_count = remote.message_count.unwrap_or(0);
    meta.agent_type = remote
        .agent_type
        .unwrap_or_else(|| DEFAULT_AGENT_TYPE.to_string());
    meta
}

/// Parse the backend's ISO-8601 timestamps (with or without offset) to ms.
fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    warn!(raw = %raw, "unparseable session timestamp");
    None
}

/// Decodes an SSE byte stream into [`SessionEvent`]s.
///
/// A chunk that completes frames or comments but no event yields
/// [`SessionEvent::KeepAlive`], so readers can tell a quiet backend from a
/// dead one. A byte-stream error is yielded once and ends the stream.
pub struct SseEventStream<S> {
    inner: S,
    decoder: SseDecoder,
    pending: VecDeque<SessionEvent>,
    done: bool,
}

impl<S> SseEventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn enqueue(&mut self, frame: &SseFrame) {
        if let Some(event) = parse_event(frame) {
            self.pending.push_back(event);
        }
    }
}

impl<S, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SessionEvent, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let queued = this.pending.len();
                    let frames = this.decoder.push(&chunk);
                    for frame in &frames {
                        this.enqueue(frame);
                    }
                    let comments = this.decoder.take_comments();
                    if this.pending.len() == queued && (comments > 0 || !frames.is_empty()) {
                        this.pending.push_back(SessionEvent::KeepAlive);
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(TransportError::Stream(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if let Some(frame) = this.decoder.finish() {
                        this.enqueue(&frame);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
