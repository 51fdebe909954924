// SPDX-License-Identifier: MIT OR Apache-2.0
//! SSE byte framing.
//!
//! Providers stream completions as server-sent events. Only `data:` lines
//! carry payloads; `event:` lines are ignored, blank lines separate events,
//! and `data: [DONE]` terminates the stream.

/// One framed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload.
    Data(Vec<u8>),
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental SSE parser. Feed raw chunks as they arrive; complete events
/// come out in order.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    done: bool,
}

impl SseParser {
    /// A fresh parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        // Consume complete lines; a trailing partial line stays buffered.
        loop {
            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            // Drop the newline and an optional carriage return.
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() || line.starts_with(b"event:") || line.starts_with(b":") {
                continue;
            }
            let Some(payload) = line.strip_prefix(b"data:") else {
                tracing::warn!(line = %String::from_utf8_lossy(&line), "unexpected line in SSE stream");
                continue;
            };
            let payload = if payload.first() == Some(&b' ') {
                &payload[1..]
            } else {
                payload
            };
            if payload == b"[DONE]" {
                self.done = true;
                events.push(SseEvent::Done);
                break;
            }
            if !payload.is_empty() {
                events.push(SseEvent::Data(payload.to_vec()));
            }
        }
        events
    }

    /// Whether the `[DONE]` terminator has been seen.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> SseEvent {
        SseEvent::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_single_event() {
        let mut p = SseParser::new();
        assert_eq!(p.feed(b"data: {\"a\":1}\n\n"), vec![data("{\"a\":1}")]);
    }

    #[test]
    fn event_lines_are_ignored() {
        let mut p = SseParser::new();
        let events = p.feed(b"event: message_start\ndata: {\"x\":1}\n\n");
        assert_eq!(events, vec![data("{\"x\":1}")]);
    }

    #[test]
    fn events_split_across_chunks_reassemble() {
        let mut p = SseParser::new();
        assert!(p.feed(b"data: {\"par").is_empty());
        assert_eq!(p.feed(b"tial\":true}\n\n"), vec![data("{\"partial\":true}")]);
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut p = SseParser::new();
        let events = p.feed(b"data: 1\n\ndata: 2\n\n");
        assert_eq!(events, vec![data("1"), data("2")]);
    }

    #[test]
    fn done_terminates() {
        let mut p = SseParser::new();
        let events = p.feed(b"data: 1\n\ndata: [DONE]\n\ndata: 2\n\n");
        assert_eq!(events, vec![data("1"), SseEvent::Done]);
        assert!(p.is_done());
        assert!(p.feed(b"data: 3\n\n").is_empty());
    }

    #[test]
    fn crlf_lines_are_handled() {
        let mut p = SseParser::new();
        assert_eq!(p.feed(b"data: 1\r\n\r\n"), vec![data("1")]);
    }

    #[test]
    fn comment_lines_are_skipped() {
        let mut p = SseParser::new();
        assert!(p.feed(b": keep-alive\n\n").is_empty());
    }

    #[test]
    fn no_space_after_colon_is_accepted() {
        let mut p = SseParser::new();
        assert_eq!(p.feed(b"data:1\n\n"), vec![data("1")]);
    }
}
