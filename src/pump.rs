//! Stream pump
//!
//! Drives an upstream event stream through a transcoder, forwarding each
//! emitted chunk to the client in arrival order and guaranteeing exactly
//! one final usage log on every exit path, including client disconnects.

use std::convert::Infallible;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::logging::RequestContext;
use crate::transcode::{EmittedChunk, EventTranscoder};
use crate::usage::UsageState;

/// A failure raised by the upstream source itself, mid-stream.
///
/// Recovered at the pump: the client receives one error chunk and the
/// stream ends with usage accounted as far as it got.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StreamFailure {
    pub message: String,
}

impl StreamFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for StreamFailure {
    fn from(e: reqwest::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Owns the per-stream usage state and guarantees the finalization log
/// runs exactly once. Dropping the output stream mid-flight (client
/// disconnect) still triggers the best-effort log through `Drop`.
struct UsageFinalizer {
    state: UsageState,
    ctx: RequestContext,
    finalized: bool,
}

impl UsageFinalizer {
    fn new(ctx: RequestContext) -> Self {
        Self {
            state: UsageState::new(),
            ctx,
            finalized: false,
        }
    }

    fn state_mut(&mut self) -> &mut UsageState {
        &mut self.state
    }

    fn finalize(&mut self) {
        if !self.finalized {
            self.finalized = true;
            self.ctx.log_stream_usage(&self.state);
        }
    }
}

impl Drop for UsageFinalizer {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Pump an upstream event stream through `transcoder`, yielding the
/// client-visible chunks.
///
/// Chunks come out in the exact order their source events arrived; events
/// that transcode to `None` are simply skipped. A terminal chunk ends the
/// stream. An upstream failure emits one provider-formatted error chunk
/// and ends the stream; finalization runs regardless.
pub fn pump<E, T, U>(
    upstream: U,
    mut transcoder: T,
    ctx: RequestContext,
) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    E: Send + 'static,
    T: EventTranscoder<Event = E> + 'static,
    U: Stream<Item = Result<E, StreamFailure>> + Send + 'static,
{
    async_stream::stream! {
        let mut finalizer = UsageFinalizer::new(ctx);
        futures::pin_mut!(upstream);

        while let Some(item) = upstream.next().await {
            match item {
                Ok(event) => match transcoder.transcode(&event, finalizer.state_mut()) {
                    Some(EmittedChunk::Data(bytes)) => yield Ok(bytes),
                    Some(EmittedChunk::Terminal(bytes)) => {
                        yield Ok(bytes);
                        break;
                    }
                    None => {}
                },
                Err(failure) => {
                    finalizer.ctx.log_error(&failure.to_string());
                    yield Ok(transcoder.error_chunk(&failure.to_string()));
                    break;
                }
            }
        }

        finalizer.finalize();
    }
}
