//! Unit tests for SSE framing and session event parsing.

use super::*;

fn frame(data: &str) -> SseFrame {
    SseFrame {
        event: None,
        data: data.to_string(),
        id: None,
    }
}

#[test]
fn test_single_complete_frame() {
    let mut decoder = SseDecoder::new();
    let frames = decoder.push(b"data: {\"type\":\"content\",\"data\":\"Hello\"}\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, r#"{"type":"content","data":"Hello"}"#);
    assert_eq!(decoder.buffered_len(), 0);
}

#[test]
fn test_partial_frame_retained_across_reads() {
    let mut decoder = SseDecoder::new();
    assert!(decoder.push(b"data: {\"type\":\"con").is_empty());
    assert!(decoder.buffered_len() > 0);
    assert!(decoder.push(b"tent\",\"data\":\"Hi\"}\n").is_empty());
    let frames = decoder.push(b"\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(
        parse_event(&frames[0]),
        Some(SessionEvent::content("Hi"))
    );
}

#[test]
fn test_utf8_split_across_chunks() {
    let payload = "data: {\"type\":\"content\",\"data\":\"caf\u{e9}\"}\n\n".as_bytes();
    // Split inside the two-byte encoding of 'é'.
    let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;
    let mut decoder = SseDecoder::new();
    assert!(decoder.push(&payload[..split]).is_empty());
    let frames = decoder.push(&payload[split..]);
    assert_eq!(parse_event(&frames[0]), Some(SessionEvent::content("café")));
}

#[test]
fn test_crlf_line_endings() {
    let mut decoder = SseDecoder::new();
    let frames = decoder.push(b"data: one\r\n\r\ndata: two\r\n\r\n");
    let data: Vec<_> = frames.iter().map(|f| f.data.as_str()).collect();
    assert_eq!(data, vec!["one", "two"]);
}

#[test]
fn test_multiple_data_lines_join_with_newline() {
    let mut decoder = SseDecoder::new();
    let frames = decoder.push(b"data: first\ndata: second\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, "first\nsecond");
}

#[test]
fn test_keep_alive_comment_is_skipped() {
    let mut decoder = SseDecoder::new();
    let frames = decoder.push(b": keep-alive\n\ndata: x\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, "x");
}

#[test]
fn test_event_and_id_fields() {
    let mut decoder = SseDecoder::new();
    let frames = decoder.push(b"event: message\nid: 7\ndata:no-space\n\ndata: y\n\n");
    assert_eq!(frames[0].event.as_deref(), Some("message"));
    assert_eq!(frames[0].id.as_deref(), Some("7"));
    assert_eq!(frames[0].data, "no-space");
    // event name resets per frame, id persists
    assert_eq!(frames[1].event, None);
    assert_eq!(frames[1].id.as_deref(), Some("7"));
}

#[test]
fn test_finish_flushes_unterminated_frame() {
    let mut decoder = SseDecoder::new();
    assert!(decoder.push(b"data: tail").is_empty());
    let last = decoder.finish().unwrap();
    assert_eq!(last.data, "tail");
    assert!(decoder.finish().is_none());
}

#[test]
fn test_finish_flushes_frame_missing_blank_line() {
    let mut decoder = SseDecoder::new();
    assert!(decoder.push(b"data: almost\n").is_empty());
    assert_eq!(decoder.finish().unwrap().data, "almost");
}

#[test]
fn test_parse_content_progress_error() {
    assert_eq!(
        parse_event(&frame(r#"{"type":"content","data":" world"}"#)),
        Some(SessionEvent::content(" world"))
    );
    assert_eq!(
        parse_event(&frame(
            r#"{"type":"progress","data":{"message":"Reading documents..."}}"#
        )),
        Some(SessionEvent::progress("Reading documents..."))
    );
    assert_eq!(
        parse_event(&frame(r#"{"type":"error","data":{"message":"model offline"}}"#)),
        Some(SessionEvent::error("model offline"))
    );
}

#[test]
fn test_parse_error_with_string_data() {
    assert_eq!(
        parse_event(&frame(r#"{"type":"error","data":"boom"}"#)),
        Some(SessionEvent::error("boom"))
    );
}

#[test]
fn test_parse_non_json_is_raw_content() {
    assert_eq!(
        parse_event(&frame("plain text chunk")),
        Some(SessionEvent::content("plain text chunk"))
    );
}

#[test]
fn test_parse_object_without_type_is_raw_content() {
    let raw = r#"{"text":"hi"}"#;
    assert_eq!(parse_event(&frame(raw)), Some(SessionEvent::content(raw)));
}

#[test]
fn test_parse_unknown_type_is_ignored() {
    assert_eq!(
        parse_event(&frame(r#"{"type":"row","data":{"title":"A paper"}}"#)),
        None
    );
}

#[test]
fn test_parse_empty_payload_is_ignored() {
    assert_eq!(parse_event(&frame("")), None);
}

#[test]
fn test_parse_whitespace_raw_payload_is_kept() {
    let mut decoder = SseDecoder::new();
    let events: Vec<_> = decoder
        .push(b"data: Hello\n\ndata:  \n\ndata: world\n\n")
        .iter()
        .filter_map(parse_event)
        .collect();
    assert_eq!(
        events,
        vec![
            SessionEvent::content("Hello"),
            SessionEvent::content(" "),
            SessionEvent::content("world"),
        ]
    );
}

#[test]
fn test_parse_content_preserves_whitespace() {
    assert_eq!(
        parse_event(&frame(r#"{"type":"content","data":"\n  indented\n"}"#)),
        Some(SessionEvent::content("\n  indented\n"))
    );
}

#[test]
fn test_parse_non_string_content_kept_as_json() {
    assert_eq!(
        parse_event(&frame(r#"{"type":"content","data":42}"#)),
        Some(SessionEvent::content("42"))
    );
}
