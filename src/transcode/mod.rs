//! Stream transcoding
//!
//! A transcoder turns one upstream stream element into at most one
//! client-visible chunk while extracting token usage and output text into
//! the request's [`UsageState`](crate::usage::UsageState). Transcoding is
//! pure synchronous work; all suspension happens in the pump driving it.

pub mod azure;
pub mod bedrock;

pub use azure::AzureSseTranscoder;
pub use bedrock::{BedrockEvent, BedrockTranscoder};

use bytes::Bytes;
use serde_json::Value;

use crate::usage::UsageState;

/// A client-visible unit produced from one upstream element.
///
/// Chunks are forwarded in the exact order their source elements arrived;
/// the pump never reorders or buffers beyond one element.
#[derive(Debug, Clone, PartialEq)]
pub enum EmittedChunk {
    /// Bytes to forward verbatim
    Data(Bytes),
    /// Final bytes; the stream ends after forwarding these
    Terminal(Bytes),
}

impl EmittedChunk {
    /// The wire bytes of this chunk
    pub fn bytes(&self) -> &Bytes {
        match self {
            EmittedChunk::Data(b) | EmittedChunk::Terminal(b) => b,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EmittedChunk::Terminal(_))
    }
}

/// Provider-specific adapter from upstream stream elements to emitted
/// chunks plus incremental usage updates.
pub trait EventTranscoder: Send {
    /// The raw upstream element type this transcoder consumes
    type Event;

    /// Transcode one element.
    ///
    /// Returns `None` when the element produces no client-visible output.
    /// The element is only read, never mutated.
    fn transcode(&mut self, event: &Self::Event, state: &mut UsageState) -> Option<EmittedChunk>;

    /// Format a mid-stream failure in this transcoder's wire format.
    ///
    /// Emitted by the pump as the last chunk when the upstream source
    /// itself fails.
    fn error_chunk(&self, message: &str) -> Bytes;
}

/// Outcome of attempting to parse an element's JSON payload.
///
/// Malformed payloads are an expected stream condition: the element is
/// still forwarded raw and merely skipped for usage/text extraction.
#[derive(Debug)]
pub enum PayloadParse {
    Parsed(Value),
    Malformed,
}

/// Attempt to parse a JSON payload extracted from a stream element.
pub fn parse_payload(raw: &str) -> PayloadParse {
    match serde_json::from_str(raw) {
        Ok(value) => PayloadParse::Parsed(value),
        Err(_) => PayloadParse::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload_success() {
        match parse_payload(r#"{"usage":{"total_tokens":5}}"#) {
            PayloadParse::Parsed(v) => assert_eq!(v["usage"]["total_tokens"], 5),
            PayloadParse::Malformed => panic!("expected parsed payload"),
        }
    }

    #[test]
    fn test_parse_payload_malformed() {
        assert!(matches!(parse_payload("{not json"), PayloadParse::Malformed));
    }
}
