//! Azure OpenAI SSE transcoder
//!
//! Forwards upstream SSE lines unmodified while extracting token usage and
//! generated text. The wire format is the provider's own: every line goes
//! to the client exactly as it arrived, `\n`-terminated.

use bytes::Bytes;
use serde_json::Value;

use super::{parse_payload, EmittedChunk, EventTranscoder, PayloadParse};
use crate::usage::UsageState;

const DATA_PREFIX: &str = "data: ";
const DONE_LINE: &str = "data: [DONE]";

/// Transcoder for Azure/OpenAI `data: <json>` line streams.
#[derive(Debug, Default)]
pub struct AzureSseTranscoder;

/// Overwrite token counts from a response/chunk `usage` object.
///
/// Shared by the stream transcoder and the single-pass extraction on
/// non-streaming responses.
pub(crate) fn extract_usage(payload: &Value, state: &mut UsageState) {
    let Some(usage) = payload.get("usage") else {
        return;
    };
    // An empty usage object is a placeholder sent on content chunks
    // when include_usage is on; only a populated one is authoritative.
    if usage.is_null() || usage.as_object().is_some_and(|u| u.is_empty()) {
        return;
    }

    let prompt = usage.get("prompt_tokens").and_then(Value::as_u64);
    let completion = usage.get("completion_tokens").and_then(Value::as_u64);
    match (prompt, completion) {
        (Some(p), Some(c)) => state.set_tokens(p, c),
        _ => {
            // Only the total is available; count it as output so the
            // logged total still matches what the provider reported.
            if let Some(total) = usage.get("total_tokens").and_then(Value::as_u64) {
                state.set_tokens(0, total);
            }
        }
    }
}

impl AzureSseTranscoder {
    pub fn new() -> Self {
        Self
    }

    fn extract_text(payload: &Value, state: &mut UsageState) {
        let Some(choices) = payload.get("choices").and_then(Value::as_array) else {
            return;
        };
        for choice in choices {
            // Chat completions carry text in delta.content; the legacy
            // completions API uses a bare text field.
            if let Some(content) = choice
                .get("delta")
                .and_then(|d| d.get("content"))
                .and_then(Value::as_str)
            {
                state.append_text(content);
            }
            if let Some(text) = choice.get("text").and_then(Value::as_str) {
                state.append_text(text);
            }
        }
    }
}

impl EventTranscoder for AzureSseTranscoder {
    type Event = String;

    fn transcode(&mut self, line: &String, state: &mut UsageState) -> Option<EmittedChunk> {
        // Blank separator lines are keep-alives: forwarded, never examined
        if line.is_empty() {
            return Some(EmittedChunk::Data(Bytes::from_static(b"\n")));
        }

        if line == DONE_LINE {
            return Some(EmittedChunk::Terminal(Bytes::from(format!("{line}\n\n"))));
        }

        if let Some(raw) = line.strip_prefix(DATA_PREFIX) {
            match parse_payload(raw) {
                PayloadParse::Parsed(payload) => {
                    extract_usage(&payload, state);
                    Self::extract_text(&payload, state);
                }
                // Forwarded regardless; extraction is best-effort
                PayloadParse::Malformed => {}
            }
        }

        Some(EmittedChunk::Data(Bytes::from(format!("{line}\n"))))
    }

    fn error_chunk(&self, message: &str) -> Bytes {
        let event = serde_json::json!({ "error": message });
        Bytes::from(format!("data: {event}\n\n"))
    }
}
