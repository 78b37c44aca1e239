//! SSE (Server-Sent Events) streaming utilities
//!
//! Provides buffering and parsing helpers for processing SSE streams
//! from upstream providers.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::pump::StreamFailure;

/// Buffer for accumulating incomplete SSE lines across chunk boundaries.
///
/// SSE data arrives as byte chunks that may not align with line boundaries.
/// This buffer accumulates incomplete lines until a complete line (ending
/// with \n) is available for processing.
///
/// Blank lines are returned as empty strings: SSE uses them as event
/// separators and keep-alives, and the transcoder forwards them untouched.
///
/// # Example
/// ```
/// use janus::streaming::SseLineBuffer;
///
/// let mut buffer = SseLineBuffer::new();
///
/// // First chunk contains partial line
/// let lines1 = buffer.feed(b"data: {\"content\":\"hel");
/// assert!(lines1.is_empty()); // No complete lines yet
///
/// // Second chunk completes the line
/// let lines2 = buffer.feed(b"lo\"}\n");
/// assert_eq!(lines2, vec!["data: {\"content\":\"hello\"}"]);
/// ```
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Accumulated incomplete line data
    incomplete: String,
}

impl SseLineBuffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self {
            incomplete: String::new(),
        }
    }

    /// Feed bytes into the buffer and return any complete lines.
    ///
    /// Complete lines are those ending with `\n`. The newline character
    /// is stripped from returned lines. Incomplete trailing data is
    /// retained in the buffer for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        // Convert bytes to string, replacing invalid UTF-8 with replacement char
        let text = String::from_utf8_lossy(bytes);

        // Append to any incomplete data from previous chunk
        self.incomplete.push_str(&text);

        let mut complete_lines = Vec::new();

        // Find complete lines (those followed by \n)
        while let Some(newline_pos) = self.incomplete.find('\n') {
            let line = self.incomplete[..newline_pos].to_string();
            self.incomplete = self.incomplete[newline_pos + 1..].to_string();
            complete_lines.push(line);
        }

        complete_lines
    }

    /// Check if there's any incomplete data remaining in the buffer.
    ///
    /// Useful for detecting truncated streams at end of response.
    pub fn has_incomplete(&self) -> bool {
        !self.incomplete.is_empty()
    }

    /// Take any remaining incomplete data.
    ///
    /// Call this at end of stream to flush a truncated trailing line.
    pub fn take_remaining(&mut self) -> String {
        std::mem::take(&mut self.incomplete)
    }
}

/// Adapt an upstream byte stream into a stream of SSE lines.
///
/// Each item is one line without its trailing newline; blank separator
/// lines are included. A truncated trailing line is flushed when the
/// upstream closes. Transport errors surface as [`StreamFailure`]s.
pub fn sse_line_stream<S>(upstream: S) -> impl Stream<Item = Result<String, StreamFailure>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    async_stream::stream! {
        let mut buffer = SseLineBuffer::new();
        futures::pin_mut!(upstream);

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    for line in buffer.feed(&bytes) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(StreamFailure::from(e));
                    return;
                }
            }
        }

        if buffer.has_incomplete() {
            yield Ok(buffer.take_remaining());
        }
    }
}
