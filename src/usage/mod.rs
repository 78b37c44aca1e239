//! Usage accounting
//!
//! Tracks token usage and assembled output text for a single in-flight
//! request. The state is owned by that request's stream pump and read once
//! at stream end to produce the final usage log line.

/// Running usage accumulator for one request.
///
/// Token counts are overwritten whenever a later, more authoritative value
/// arrives ("last usage wins", not max or sum). Text is append-only and is
/// destined for the log, never returned to the client as a shaped value.
#[derive(Debug, Default)]
pub struct UsageState {
    input_tokens: u64,
    output_tokens: u64,
    text: String,
}

impl UsageState {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite both token counts with a later authoritative value
    pub fn set_tokens(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
    }

    /// Append a text fragment extracted from a stream element
    pub fn append_text(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    /// Total tokens used
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Assembled output text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Check if any token usage was reported
    pub fn has_usage(&self) -> bool {
        self.total_tokens() > 0
    }
}
