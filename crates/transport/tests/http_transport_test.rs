//! HTTP round trips against a wiremock backend.

use chicken_core::{ExchangeContext, MentionDocument, Role};
use chicken_transport::{
    CancelToken, HttpSessionTransport, SessionEvent, SessionTransport, StreamRequest,
    TransportError,
};
use futures::StreamExt;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(session_id: &str, message: &str) -> StreamRequest {
    StreamRequest {
        session_id: session_id.to_string(),
        message: message.to_string(),
        agent_type: "chat".to_string(),
        context: ExchangeContext::default(),
    }
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

#[tokio::test]
async fn streams_typed_events_from_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s1/stream"))
        .and(query_param("agent_type", "chat"))
        .and(body_json(serde_json::json!({"message": "hi"})))
        .respond_with(sse(concat!(
            "data: {\"type\":\"progress\",\"data\":{\"message\":\"Thinking...\"}}\n\n",
            ": keep-alive\n\n",
            "data: {\"type\":\"content\",\"data\":\"Hello\"}\n\n",
            "data: {\"type\":\"content\",\"data\":\" world\"}\n\n",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpSessionTransport::new(&format!("{}/", server.uri()));
    let stream = transport
        .open_stream(request("s1", "hi"), CancelToken::new())
        .await
        .unwrap();
    // Liveness markers depend on how the body is chunked.
    let events: Vec<_> = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .filter(|event| *event != Ok(SessionEvent::KeepAlive))
        .collect();

    assert_eq!(
        events,
        vec![
            Ok(SessionEvent::progress("Thinking...")),
            Ok(SessionEvent::content("Hello")),
            Ok(SessionEvent::content(" world")),
        ]
    );
}

#[tokio::test]
async fn sends_context_when_documents_attached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s2/stream"))
        .and(body_json(serde_json::json!({
            "message": "summarize",
            "context": {
                "mention_documents": [{"title": "Paper A"}],
                "model": "gpt-4o"
            }
        })))
        .respond_with(sse("data: {\"type\":\"content\",\"data\":\"ok\"}\n\n"))
        .expect(1)
        .mount(&server)
        .await;

    let mut req = request("s2", "summarize");
    req.context = ExchangeContext {
        mention_documents: vec![MentionDocument::titled("Paper A")],
        model: Some("gpt-4o".to_string()),
    };

    let transport = HttpSessionTransport::new(&server.uri());
    let events: Vec<_> = transport
        .open_stream(req, CancelToken::new())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(events, vec![Ok(SessionEvent::content("ok"))]);
}

#[tokio::test]
async fn non_success_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s3/stream"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let transport = HttpSessionTransport::new(&server.uri());
    let err = match transport
        .open_stream(request("s3", "hi"), CancelToken::new())
        .await
    {
        Ok(_) => panic!("expected an API error"),
        Err(e) => e,
    };
    assert_eq!(
        err,
        TransportError::Api {
            status: 503,
            body: "overloaded".to_string()
        }
    );
}

#[tokio::test]
async fn cancelled_token_aborts_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s4/stream"))
        .respond_with(sse("").set_delay(std::time::Duration::from_secs(10)))
        .mount(&server)
        .await;

    let cancel = CancelToken::new();
    cancel.cancel();

    let transport = HttpSessionTransport::new(&server.uri());
    let result = transport.open_stream(request("s4", "hi"), cancel).await;
    assert!(matches!(result, Err(TransportError::Cancelled)));
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let transport = HttpSessionTransport::new("http://127.0.0.1:9");
    let result = transport
        .open_stream(request("s5", "hi"), CancelToken::new())
        .await;
    assert!(matches!(result, Err(TransportError::Network(_))));
}

#[tokio::test]
async fn fetches_message_page_with_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s6/messages"))
        .and(query_param("limit", "200"))
        .and(query_param("before", "1718000000000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [
                {"role": "user", "content": "first", "timestamp": 1717999990000.0},
                {"role": "ai", "content": "second", "timestamp": 1717999995000.0}
            ],
            "has_more": true,
            "oldest": 1717999990000.0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpSessionTransport::new(&server.uri());
    let page = transport
        .fetch_messages("s6", Some("1718000000000"), 200)
        .await
        .unwrap();

    assert!(page.has_more);
    assert_eq!(page.messages.len(), 2);
    assert_eq!(page.messages[0].role, Role::User);
    assert_eq!(page.messages[0].content, "first");
    assert_eq!(page.messages[0].timestamp, 1717999990000);
    assert_eq!(page.messages[1].role, Role::Assistant);
    assert_ne!(page.messages[0].id, page.messages[1].id);
    assert_eq!(page.oldest_cursor.as_deref(), Some("1717999990000.0"));
}

#[tokio::test]
async fn latest_page_omits_before() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s7/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [],
            "has_more": false,
            "oldest": null
        })))
        .mount(&server)
        .await;

    let transport = HttpSessionTransport::new(&server.uri());
    let page = transport.fetch_messages("s7", None, 50).await.unwrap();
    assert!(page.messages.is_empty());
    assert!(!page.has_more);
    assert_eq!(page.oldest_cursor, None);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].url.query(), Some("limit=50"));
}

#[tokio::test]
async fn updates_title_via_query_param() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s8/title"))
        .and(query_param("title", "What is attention?"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpSessionTransport::new(&server.uri());
    transport
        .update_title("s8", "What is attention?")
        .await
        .unwrap();
}

#[tokio::test]
async fn lists_and_deletes_sessions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sessions": [{
                "session_id": "abc",
                "title": "Transformers",
                "created_at": "2024-06-01T12:00:00",
                "updated_at": "2024-06-01T12:05:00",
                "message_count": 6,
                "agent_type": "search",
                "last_activity": "2024-06-01T12:05:00"
            }],
            "total_count": 1,
            "timestamp": "2024-06-01T12:06:00"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sessions/abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpSessionTransport::new(&server.uri());
    let sessions = transport.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    let meta = &sessions[0];
    assert_eq!(meta.id, "abc");
    assert_eq!(meta.title, "Transformers");
    assert_eq!(meta.message_count, 6);
    assert_eq!(meta.agent_type, "search");
    assert_eq!(meta.updated_at - meta.created_at, 5 * 60 * 1000);

    transport.delete_session("abc").await.unwrap();
}

#[tokio::test]
async fn health_check_reports_reachability() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sessions": []})))
        .mount(&server)
        .await;

    assert!(HttpSessionTransport::new(&server.uri())
        .health_check()
        .await
        .is_ok());
    assert!(HttpSessionTransport::new("http://127.0.0.1:9")
        .health_check()
        .await
        .is_err());
}
