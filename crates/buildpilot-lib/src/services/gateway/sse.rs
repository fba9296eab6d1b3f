// Server-sent event decoding for the gateway stream
//
// Wire format: `data: {json}` lines separated by blank lines.
// - `data: [DONE]`, `{"done": true}` or `{"type": "message_stop"}` end the stream
// - `delta.text` (or a top-level `text`) carries a token
// - `{"error": ...}` ends the stream with an error
// - anything unparseable is skipped

use serde_json::Value;

use super::error::GatewayError;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
    Error(GatewayError),
}

/// Incremental decoder. Bytes may be split anywhere, including inside a
/// UTF-8 sequence or a line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a terminator or error has been decoded
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a chunk and return the events completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.decode_line(line.trim_end_matches(['\n', '\r'])) {
                let terminal = !matches!(event, StreamEvent::Token(_));
                events.push(event);
                if terminal {
                    self.finished = true;
                    self.pending.clear();
                    break;
                }
            }
        }
        events
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished || self.pending.is_empty() {
            return Vec::new();
        }
        let mut tail = std::mem::take(&mut self.pending);
        tail.push(b'\n');
        self.feed(&tail)
    }

    fn decode_line(&self, line: &str) -> Option<StreamEvent> {
        let data = line.strip_prefix(DATA_PREFIX)?.trim();
        if data.is_empty() {
            return None;
        }
        if data == DONE_SENTINEL {
            return Some(StreamEvent::Done);
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("[Gateway] Skipping malformed stream payload: {}", e);
                return None;
            }
        };
        decode_payload(&value)
    }
}

fn decode_payload(value: &Value) -> Option<StreamEvent> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
                .unwrap_or_else(|| other.to_string()),
        };
        return Some(StreamEvent::Error(GatewayError::from_stream_payload(message)));
    }

    if value.get("done").and_then(|d| d.as_bool()) == Some(true)
        || value.get("type").and_then(|t| t.as_str()) == Some("message_stop")
    {
        return Some(StreamEvent::Done);
    }

    value
        .get("delta")
        .and_then(|d| d.get("text"))
        .or_else(|| value.get("text"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(|t| StreamEvent::Token(t.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_decodes_tokens_until_done() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(
            b"data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"Hel\"}}\n\n\
              data: {\"delta\":{\"text\":\"lo\"}}\n\n\
              data: [DONE]\n\n\
              data: {\"delta\":{\"text\":\"ignored\"}}\n\n",
        );

        assert_eq!(tokens(&events), "Hello");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_chunk_boundaries_inside_line_and_utf8() {
        let payload = "data: {\"delta\":{\"text\":\"caf\u{e9}\"}}\n\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        let mut events = decoder.feed(&payload[..split]);
        assert!(events.is_empty());
        events.extend(decoder.feed(&payload[split..]));

        assert_eq!(tokens(&events), "café");
    }

    #[test]
    fn test_alternative_terminators() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"data: {\"done\":true}\n"), vec![StreamEvent::Done]);

        let mut decoder = SseDecoder::new();
        assert_eq!(
            decoder.feed(b"data: {\"type\":\"message_stop\"}\n"),
            vec![StreamEvent::Done]
        );
    }

    #[test]
    fn test_malformed_json_is_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {not json\n\nevent: ping\n\ndata: {\"text\":\"ok\"}\n\n");
        assert_eq!(events, vec![StreamEvent::Token("ok".into())]);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_error_payload_ends_stream() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(
            b"data: {\"text\":\"a\"}\n\ndata: {\"error\":\"Daily quota exhausted\"}\n\ndata: {\"text\":\"b\"}\n\n",
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            StreamEvent::Error(GatewayError::QuotaExhausted(_))
        ));
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"text\":\"tail\"}").is_empty());
        assert_eq!(decoder.finish(), vec![StreamEvent::Token("tail".into())]);
    }
}
