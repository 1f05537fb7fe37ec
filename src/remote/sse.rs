//! Minimal `text/event-stream` frame parser for the remote subscription
//! feed.
//!
//! The remote database streams `event:`/`data:` frames separated by blank
//! lines, with `keep-alive` frames during idle periods. Chunks arrive at
//! arbitrary byte boundaries, so the parser buffers until a full frame is
//! available.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Default)]
pub struct SseParser {
    buf: String,
    event: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buf.push_str(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.flush() {
                    events.push(event);
                }
                continue;
            }
            // Comment line, per the event-stream format
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = value.to_string(),
                "data" => self.data_lines.push(value.to_string()),
                // id / retry are irrelevant to this feed
                _ => {}
            }
        }

        events
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if self.event.is_empty() && self.data_lines.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: std::mem::take(&mut self.event),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut parser = SseParser::new();
        let events = parser.push("event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "put");
        assert_eq!(events[0].data, "{\"path\":\"/\",\"data\":null}");
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: pu").is_empty());
        assert!(parser.push("t\ndata: {\"path\"").is_empty());
        let events = parser.push(":\"/\",\"data\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "put");
        assert_eq!(events[0].data, "{\"path\":\"/\",\"data\":1}");
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.push("event: put\ndata: 1\n\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "put");
        assert_eq!(events[1].event, "keep-alive");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut parser = SseParser::new();
        let events = parser.push("data: line one\ndata: line two\n\n");
        assert_eq!(events[0].data, "line one\nline two");
        assert_eq!(events[0].event, "");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.push("event: put\r\ndata: 1\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "1");
    }

    #[test]
    fn test_comments_and_blank_frames_ignored() {
        let mut parser = SseParser::new();
        let events = parser.push(": heartbeat comment\n\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_data_without_space_after_colon() {
        let mut parser = SseParser::new();
        let events = parser.push("data:{\"x\":1}\n\n");
        assert_eq!(events[0].data, "{\"x\":1}");
    }
}
