//! # SSE Parser
//!
//! Incremental Server-Sent Events decoder for upstream token streams.
//!
//! The parser is fed raw byte chunks as they arrive and hands back the
//! complete `data:` payloads found so far. It keeps only the trailing partial
//! line between calls. A line longer than the parser's limit is dropped whole,
//! so an upstream that never sends a newline cannot grow the buffer.

use bytes::BytesMut;
use serde_json::Value;

/// Marker that upstreams send as the last data line.
pub const DONE_MARKER: &str = "[DONE]";

/// Default limit on one SSE line.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// A decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` line.
    Data(String),
    /// The `[DONE]` marker.
    Done,
}

/// Stateful line splitter for SSE byte streams.
#[derive(Debug)]
pub struct SseParser {
    buffer: BytesMut,
    saw_done: bool,
    max_line: usize,
    /// Skipping the rest of an oversized line up to its newline.
    discarding: bool,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that drops lines longer than `max_line` bytes.
    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            saw_done: false,
            max_line,
            discarding: false,
        }
    }

    /// Feed one chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let chunk = if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &chunk[pos + 1..]
                }
                None => return Vec::new(),
            }
        } else {
            chunk
        };
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(newline_pos + 1);
            line.truncate(line.len() - 1);
            if line.len() > self.max_line {
                tracing::warn!(len = line.len(), limit = self.max_line, "Dropping oversized SSE line");
                continue;
            }
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            // Invalid UTF-8 lines are dropped.
            let Ok(line) = std::str::from_utf8(&line) else {
                continue;
            };
            if let Some(event) = self.decode_line(line) {
                events.push(event);
            }
        }

        if self.buffer.len() > self.max_line {
            tracing::warn!(limit = self.max_line, "Dropping oversized SSE line");
            self.buffer.clear();
            self.discarding = true;
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        let line = std::str::from_utf8(&rest).ok()?.trim().to_string();
        self.decode_line(&line)
    }

    /// Whether the `[DONE]` marker has been seen.
    #[must_use]
    pub const fn saw_done(&self) -> bool {
        self.saw_done
    }

    fn decode_line(&mut self, line: &str) -> Option<SseEvent> {
        let data = extract_data(line)?;
        if data == DONE_MARKER {
            self.saw_done = true;
            return Some(SseEvent::Done);
        }
        Some(SseEvent::Data(data.to_string()))
    }
}

/// Payload of a `data:` line, or `None` for comments, other fields and blanks.
fn extract_data(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();
    (!data.is_empty()).then_some(data)
}

/// Text carried by one JSON data payload.
///
/// Accepts a bare JSON string, or a chat-completions chunk with
/// `choices[0].delta.content`, `choices[0].message.content` or
/// `choices[0].text`. Returns `None` for anything else, including non-JSON.
#[must_use]
pub fn fragment_text(data: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping non-JSON SSE data line");
            return None;
        }
    };

    if let Value::String(s) = value {
        return Some(s);
    }

    let choice = value.get("choices")?.get(0)?;
    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .or_else(|| choice.get("message").and_then(|m| m.get("content")))
        .or_else(|| choice.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> SseEvent {
        SseEvent::Data(s.to_string())
    }

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\"a\":1}\n\n");
        assert_eq!(events, vec![data("{\"a\":1}")]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"par").is_empty());
        let events = parser.push(b"tial\":true}\n\n");
        assert_eq!(events, vec![data("{\"partial\":true}")]);
    }

    #[test]
    fn test_multiple_events_and_done() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: \"a\"\n\ndata: \"b\"\n\ndata: [DONE]\n\n");
        assert_eq!(events, vec![data("\"a\""), data("\"b\""), SseEvent::Done]);
        assert!(parser.saw_done());
    }

    #[test]
    fn test_skips_comments_and_other_fields() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keepalive\nevent: ping\nid: 3\ndata:\ndata:{\"v\":1}\r\n");
        assert_eq!(events, vec![data("{\"v\":1}")]);
    }

    #[test]
    fn test_finish_flushes_trailing_line() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: \"tail\"").is_empty());
        assert_eq!(parser.finish(), Some(data("\"tail\"")));
        assert_eq!(parser.finish(), None);
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let mut parser = SseParser::with_max_line(16);
        let long = format!("data: {}", "x".repeat(40));
        assert!(parser.push(long.as_bytes()).is_empty());
        assert!(parser.buffer.is_empty());

        // Remainder of the dropped line, then a normal event.
        assert!(parser.push(&[b'x'; 64]).is_empty());
        assert!(parser.buffer.is_empty());
        assert_eq!(parser.push(b"xxxx\ndata: ok\n"), vec![data("ok")]);

        // A complete line over the limit is dropped too.
        let events = parser.push(format!("{long}\ndata: ok\n").as_bytes());
        assert_eq!(events, vec![data("ok")]);
    }

    #[test]
    fn test_fragment_text_shapes() {
        assert_eq!(fragment_text("\"Bon\"").as_deref(), Some("Bon"));
        assert_eq!(
            fragment_text(r#"{"choices":[{"delta":{"content":"jour"}}]}"#).as_deref(),
            Some("jour")
        );
        assert_eq!(
            fragment_text(r#"{"choices":[{"message":{"content":"all"}}]}"#).as_deref(),
            Some("all")
        );
        assert_eq!(
            fragment_text(r#"{"choices":[{"text":"legacy"}]}"#).as_deref(),
            Some("legacy")
        );
    }

    #[test]
    fn test_fragment_text_ignores_malformed() {
        assert!(fragment_text("not json at all").is_none());
        assert!(fragment_text(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).is_none());
        assert!(fragment_text("42").is_none());
    }
}
