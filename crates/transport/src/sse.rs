//! SSE framing and event decoding for the session stream endpoint.
//!
//! [`SseDecoder`] turns arbitrary byte chunks into complete frames, keeping
//! partial lines across reads. [`parse_event`] maps a frame's `data` payload
//! onto a [`SessionEvent`].
//!
//! Wire format:
//! ```text
//! data: {"type":"progress","data":{"message":"Reading documents..."}}
//!
//! data: {"type":"content","data":"Hello"}
//!
//! : keep-alive
//!
//! ```

use serde_json::Value;
use tracing::{debug, trace};

use crate::event::SessionEvent;

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if the server sent one.
    pub event: Option<String>,
    /// All `data:` lines of the frame joined with `\n`.
    pub data: String,
    /// Last seen `id:` field.
    pub id: Option<String>,
}

/// Incremental SSE decoder.
///
/// Bytes are buffered until a full line is available, so a multi-byte UTF-8
/// character split across two reads decodes correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
    event: Option<String>,
    last_id: Option<String>,
    comments: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = &self.buffer[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            start = end + 1;

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);

        frames
    }

    /// Flush at end of stream: an unterminated last line and a frame that
    /// never saw its blank line are still delivered.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = rest.strip_suffix(b"\r").unwrap_or(&rest);
            let line = String::from_utf8_lossy(rest).into_owned();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    /// Bytes held back waiting for a newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Comment lines seen since the last call.
    pub fn take_comments(&mut self) -> usize {
        std::mem::take(&mut self.comments)
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment line, used by the backend for keep-alives.
        if line.starts_with(':') {
            trace!(comment = %line, "SSE comment");
            self.comments += 1;
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            "retry" => {}
            other => trace!(field = %other, "ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data_lines.is_empty() {
            self.event = None;
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(SseFrame {
            event: self.event.take(),
            data,
            id: self.last_id.clone(),
        })
    }
}

/// Decode one frame into a [`SessionEvent`].
///
/// Returns `None` for frames that carry nothing for the transcript (empty
/// payloads, unknown event types). A payload that is not a JSON envelope is
/// kept verbatim as raw content, whitespace included, so a degraded
/// plain-text stream still makes progress.
pub fn parse_event(frame: &SseFrame) -> Option<SessionEvent> {
    let data = frame.data.as_str();
    if data.is_empty() {
        return None;
    }

    let parsed = match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            debug!(data = %data, "non-envelope SSE payload, treating as raw content");
            return Some(SessionEvent::content(data));
        }
    };

    match parsed.get("type").and_then(Value::as_str) {
        Some("content") => Some(SessionEvent::content(payload_text(parsed.get("data")))),
        Some("progress") => Some(SessionEvent::progress(payload_message(parsed.get("data")))),
        Some("error") => Some(SessionEvent::error(payload_message(parsed.get("data")))),
        Some(other) => {
            trace!(event_type = other, "ignoring unknown session event type");
            None
        }
        None => {
            debug!(data = %data, "SSE payload without type, treating as raw content");
            Some(SessionEvent::content(data))
        }
    }
}

/// `content` data is normally a string; anything else is kept as JSON text.
fn payload_text(data: Option<&Value>) -> String {
    match data {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

/// `progress` and `error` data is `{"message": ...}` or a bare string.
fn payload_message(data: Option<&Value>) -> String {
    match data {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(map.clone()).to_string(),
        },
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests;
