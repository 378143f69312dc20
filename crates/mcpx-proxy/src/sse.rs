//! SSE (Server-Sent Events) parser
//!
//! Backends may answer a JSON-RPC POST with `text/event-stream`; each
//! event's `data` field carries one JSON-RPC message.

use bytes::Bytes;
use tracing::trace;

/// One dispatched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Incremental SSE parser
#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes of an incomplete line
    buffer: Vec<u8>,
    data: String,
    event: Option<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every event they complete
    pub fn feed(&mut self, bytes: &Bytes) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Dispatch whatever is pending once the stream has ended
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(b":") {
            trace!("SSE keepalive/comment");
            return None;
        }

        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };

        match field {
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => trace!(field, "SSE field ignored"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            id: self.id.clone(),
            data: std::mem::take(&mut self.data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(&Bytes::from_static(b"event: message\nda")).is_empty());

        let events = parser.feed(&Bytes::from_static(b"ta: {\"id\":1}\r\n\r\n"));
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("message".into()),
                id: None,
                data: "{\"id\":1}".into(),
            }]
        );
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(&Bytes::from_static(b": ping\ndata: a\ndata: b\nid: 7\n\n"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed(&Bytes::from_static(b"data: tail")).is_empty());
        assert_eq!(parser.finish().map(|e| e.data), Some("tail".to_string()));
    }
}
