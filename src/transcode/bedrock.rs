//! Bedrock event transcoder
//!
//! Serializes structured Bedrock stream events into JSON lines while
//! extracting token usage and generated text. Every event is forwarded as
//! one `{"<kind>": <payload>}\n` line regardless of kind — unknown
//! upstream formats must never break the forwarding guarantee.

use bytes::Bytes;
use serde_json::Value;

use super::{parse_payload, EmittedChunk, EventTranscoder, PayloadParse};
use crate::usage::UsageState;

/// One structured event from a Bedrock response stream.
///
/// `kind` is the event-type name (`chunk`, `metadata`, `contentBlockDelta`,
/// ...); `payload` is the event body with any binary sub-fields already
/// decoded to text by the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BedrockEvent {
    pub kind: String,
    pub payload: Value,
}

impl BedrockEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Transcoder for Bedrock `InvokeModelWithResponseStream` / `ConverseStream`
/// event streams.
#[derive(Debug, Default)]
pub struct BedrockTranscoder;

impl BedrockTranscoder {
    pub fn new() -> Self {
        Self
    }

    /// ConverseStream reports usage in a dedicated metadata event
    fn extract_metadata_usage(payload: &Value, state: &mut UsageState) {
        if let Some(usage) = payload.get("usage") {
            let input = usage.get("inputTokens").and_then(Value::as_u64).unwrap_or(0);
            let output = usage
                .get("outputTokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            state.set_tokens(input, output);
        }
    }

    /// InvokeModel streams wrap model output in chunk.bytes; the inner JSON
    /// shape is model-dependent. The field priority here is a heuristic
    /// over the common formats, checked in order, first match wins.
    fn extract_chunk_text(payload: &Value, state: &mut UsageState) {
        let Some(raw) = payload.get("bytes").and_then(Value::as_str) else {
            return;
        };
        let PayloadParse::Parsed(data) = parse_payload(raw) else {
            return;
        };

        if let Some(text) = data.get("outputText").and_then(Value::as_str) {
            state.append_text(text);
        } else if let Some(text) = data.get("completion").and_then(Value::as_str) {
            state.append_text(text);
        } else if let Some(text) = data
            .get("delta")
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
        {
            state.append_text(text);
        }
    }

    fn extract_delta_text(payload: &Value, state: &mut UsageState) {
        if let Some(text) = payload
            .get("delta")
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
        {
            state.append_text(text);
        }
    }
}

impl EventTranscoder for BedrockTranscoder {
    type Event = BedrockEvent;

    fn transcode(&mut self, event: &BedrockEvent, state: &mut UsageState) -> Option<EmittedChunk> {
        match event.kind.as_str() {
            "metadata" => Self::extract_metadata_usage(&event.payload, state),
            "chunk" => Self::extract_chunk_text(&event.payload, state),
            "contentBlockDelta" => Self::extract_delta_text(&event.payload, state),
            // Unrecognized kinds contribute nothing but are still forwarded
            _ => {}
        }

        let mut wrapper = serde_json::Map::with_capacity(1);
        wrapper.insert(event.kind.clone(), event.payload.clone());
        let line = Value::Object(wrapper);
        Some(EmittedChunk::Data(Bytes::from(format!("{line}\n"))))
    }

    fn error_chunk(&self, message: &str) -> Bytes {
        let event = serde_json::json!({ "error": message });
        Bytes::from(format!("{event}\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn transcode(event: &BedrockEvent, state: &mut UsageState) -> EmittedChunk {
        BedrockTranscoder::new().transcode(event, state).unwrap()
    }

    #[test]
    fn test_chunk_bytes_completion_text() {
        let mut state = UsageState::new();
        let event = BedrockEvent::new("chunk", json!({"bytes": r#"{"completion":"foo"}"#}));

        let chunk = transcode(&event, &mut state);
        let line = std::str::from_utf8(chunk.bytes()).unwrap();

        assert!(line.ends_with('\n'));
        let parsed: Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["chunk"]["bytes"], r#"{"completion":"foo"}"#);
        assert_eq!(state.text(), "foo");
    }

    #[test]
    fn test_chunk_bytes_priority_output_text_wins() {
        let mut state = UsageState::new();
        let inner = r#"{"outputText":"a","completion":"b","delta":{"text":"c"}}"#;
        transcode(
            &BedrockEvent::new("chunk", json!({ "bytes": inner })),
            &mut state,
        );
        // First matching field wins per chunk
        assert_eq!(state.text(), "a");
    }

    #[test]
    fn test_chunk_bytes_delta_text_fallback() {
        let mut state = UsageState::new();
        transcode(
            &BedrockEvent::new("chunk", json!({"bytes": r#"{"delta":{"text":"claude"}}"#})),
            &mut state,
        );
        assert_eq!(state.text(), "claude");
    }

    #[test]
    fn test_chunk_bytes_malformed_inner_json_skipped() {
        let mut state = UsageState::new();
        let event = BedrockEvent::new("chunk", json!({"bytes": "{broken"}));
        let chunk = transcode(&event, &mut state);
        // Still forwarded, just no extraction
        assert!(std::str::from_utf8(chunk.bytes()).unwrap().contains("broken"));
        assert_eq!(state.text(), "");
    }

    #[test]
    fn test_metadata_usage_overwrites() {
        let mut state = UsageState::new();
        state.set_tokens(1, 1);
        transcode(
            &BedrockEvent::new("metadata", json!({"usage":{"inputTokens":12,"outputTokens":34}})),
            &mut state,
        );
        assert_eq!(state.input_tokens(), 12);
        assert_eq!(state.output_tokens(), 34);
    }

    #[test]
    fn test_content_block_delta_text() {
        let mut state = UsageState::new();
        transcode(
            &BedrockEvent::new("contentBlockDelta", json!({"delta":{"text":"Hi"},"contentBlockIndex":0})),
            &mut state,
        );
        assert_eq!(state.text(), "Hi");
    }

    #[test]
    fn test_unknown_event_forwarded_without_extraction() {
        let mut state = UsageState::new();
        let event = BedrockEvent::new("messageStop", json!({"stopReason":"end_turn"}));

        let chunk = transcode(&event, &mut state);
        let parsed: Value =
            serde_json::from_str(std::str::from_utf8(chunk.bytes()).unwrap()).unwrap();

        assert_eq!(parsed["messageStop"]["stopReason"], "end_turn");
        assert_eq!(state.text(), "");
        assert_eq!(state.total_tokens(), 0);
    }

    #[test]
    fn test_events_never_terminal() {
        // Bedrock streams terminate by closing, not via a sentinel event
        let mut state = UsageState::new();
        let chunk = transcode(&BedrockEvent::new("metadata", json!({})), &mut state);
        assert!(!chunk.is_terminal());
    }

    #[test]
    fn test_error_chunk_is_json_line() {
        let bytes = BedrockTranscoder::new().error_chunk("stream reset");
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["error"], "stream reset");
    }
}
