use crate::event::{Event, EventType, HealthSignal, HealthState, RawContentPart, RawLine};
use crate::ring_buffer::RingBuffer;

/// Bound on the non-JSON backlog kept per worker. Mirrors the 100-line
/// `recentOutput` cap the Worker Manager applies on top of this.
const NON_JSON_BACKLOG_CAPACITY: usize = 100;

/// Incremental NDJSON decoder for a single worker's stdout stream.
///
/// Feed it chunks as they arrive (`parse_batch`); it handles lines split
/// across chunk boundaries by buffering the trailing partial line. Lines
/// that don't decode as JSON are kept in a bounded ring buffer rather
/// than discarded, so callers can still inspect interleaved plain text.
pub struct LogParser {
    partial_line: String,
    non_json: RingBuffer<String>,
    session_id: Option<String>,
    last_event_type: Option<EventType>,
}

impl Default for LogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser {
    pub fn new() -> Self {
        Self {
            partial_line: String::new(),
            non_json: RingBuffer::new(NON_JSON_BACKLOG_CAPACITY),
            session_id: None,
            last_event_type: None,
        }
    }

    /// Split `chunk` on newlines and decode each complete line. The last,
    /// possibly-partial line is held back and prepended to the next call.
    ///
    /// `parse_batch(a) + parse_batch(b) == parse_batch(a + b)` as long as
    /// callers don't interleave other mutating calls in between.
    pub fn parse_batch(&mut self, chunk: &str) -> Vec<Event> {
        if chunk.is_empty() {
            return Vec::new();
        }

        let combined = format!("{}{}", self.partial_line, chunk);
        let ends_with_newline = combined.ends_with('\n');
        let mut lines: Vec<&str> = combined.split('\n').collect();

        // split('\n') on a string ending in '\n' yields a trailing empty
        // element; drop it so we don't treat it as a dangling partial line.
        let trailing = if ends_with_newline {
            self.partial_line.clear();
            lines.pop();
            None
        } else {
            lines.pop()
        };

        let mut events = Vec::with_capacity(lines.len());
        for line in lines {
            if let Some(event) = self.decode_line(line) {
                events.push(event);
            }
        }

        if let Some(rest) = trailing {
            self.partial_line = rest.to_string();
        }

        events
    }

    /// Convenience wrapper for callers that already have whole lines.
    pub fn parse_line(&mut self, line: &str) -> Option<Event> {
        self.decode_line(line)
    }

    fn decode_line(&mut self, line: &str) -> Option<Event> {
        if line.is_empty() {
            return None;
        }

        let raw: RawLine = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(_) => {
                self.non_json.push(line.to_string());
                return None;
            }
        };

        let event_type = match raw.kind.as_str() {
            "system" => EventType::System,
            "assistant" => EventType::Assistant,
            "user" => EventType::User,
            "result" => EventType::Result,
            "tool_use" => EventType::ToolUse,
            "tool_result" => EventType::ToolResult,
            "error" => EventType::Error,
            _ => {
                self.non_json.push(line.to_string());
                return None;
            }
        };

        if event_type == EventType::System && raw.subtype.as_deref() == Some("init") {
            if let Some(sid) = &raw.session_id {
                self.session_id = Some(sid.clone());
            }
        }

        let text = raw
            .message
            .as_ref()
            .and_then(|m| m.content.as_ref())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| match p {
                        RawContentPart::Text { text } => Some(text.as_str()),
                        RawContentPart::Other => None,
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|s| !s.is_empty())
            .or(raw.result.clone());

        self.last_event_type = Some(event_type);

        Some(Event {
            event_type,
            subtype: raw.subtype,
            session_id: raw.session_id.or_else(|| self.session_id.clone()),
            text,
            duration_ms: raw.duration_ms,
            is_error: raw.is_error.unwrap_or(event_type == EventType::Error),
            timestamp: now_millis(),
        })
    }

    /// Most recent `n` non-JSON lines, oldest first.
    pub fn recent_output(&self, n: usize) -> Vec<String> {
        self.non_json.recent(n)
    }

    pub fn get_session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    pub fn get_health_signal(&self) -> HealthSignal {
        match self.last_event_type {
            None => HealthSignal { state: HealthState::Unknown, is_healthy: true },
            Some(EventType::Error) => HealthSignal { state: HealthState::Errored, is_healthy: false },
            Some(EventType::Assistant) | Some(EventType::ToolUse) => {
                HealthSignal { state: HealthState::Working, is_healthy: true }
            }
            Some(_) => HealthSignal { state: HealthState::Idle, is_healthy: true },
        }
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chunk_returns_no_events_and_no_buffer_advance() {
        let mut p = LogParser::new();
        assert!(p.parse_batch("").is_empty());
        assert_eq!(p.partial_line, "");
    }

    #[test]
    fn decodes_init_event_and_captures_session_id() {
        let mut p = LogParser::new();
        let events = p.parse_batch("{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"abc\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::System);
        assert_eq!(p.get_session_id(), Some("abc".to_string()));
    }

    #[test]
    fn non_json_lines_go_to_backlog_not_events() {
        let mut p = LogParser::new();
        let events = p.parse_batch("hello there\nworld\n");
        assert!(events.is_empty());
        assert_eq!(p.recent_output(10), vec!["hello there", "world"]);
    }

    #[test]
    fn partial_line_split_across_chunks_matches_single_call() {
        let whole = "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}}\n";
        let (a, b) = whole.split_at(30);

        let mut split = LogParser::new();
        let mut events = split.parse_batch(a);
        events.extend(split.parse_batch(b));

        let mut joined = LogParser::new();
        let joined_events = joined.parse_batch(whole);

        assert_eq!(events.len(), joined_events.len());
        assert_eq!(events[0].text, joined_events[0].text);
    }

    #[test]
    fn assistant_text_is_extracted() {
        let mut p = LogParser::new();
        let events = p.parse_batch(
            "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"hello\"}]}}\n",
        );
        assert_eq!(events[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn result_event_carries_duration() {
        let mut p = LogParser::new();
        let events = p.parse_batch("{\"type\":\"result\",\"result\":\"done\",\"duration_ms\":42}\n");
        assert_eq!(events[0].event_type, EventType::Result);
        assert_eq!(events[0].duration_ms, Some(42));
        assert_eq!(events[0].text.as_deref(), Some("done"));
    }

    #[test]
    fn health_signal_tracks_last_event() {
        let mut p = LogParser::new();
        assert!(p.get_health_signal().is_healthy);
        p.parse_batch("{\"type\":\"error\",\"is_error\":true}\n");
        let signal = p.get_health_signal();
        assert_eq!(signal.state, HealthState::Errored);
        assert!(!signal.is_healthy);
    }

    #[test]
    fn unrecognized_type_falls_back_to_backlog() {
        let mut p = LogParser::new();
        let events = p.parse_batch("{\"type\":\"mystery\"}\n");
        assert!(events.is_empty());
        assert_eq!(p.recent_output(1).len(), 1);
    }

    #[test]
    fn high_volume_backlog_stays_bounded() {
        let mut p = LogParser::new();
        for i in 0..10_000 {
            p.parse_batch(&format!("plain line {i}\n"));
        }
        assert_eq!(p.recent_output(1000).len(), 100);
    }
}
