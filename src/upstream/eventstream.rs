//! AWS event stream decoding
//!
//! Bedrock streaming responses use the AWS event stream protocol: binary
//! frames with `:message-type` / `:event-type` headers and a JSON payload.
//! This module decodes that framing into [`BedrockEvent`]s, with any
//! base64 `bytes` payloads decoded to text so the transcoder and the
//! client-visible JSON lines carry readable content.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use aws_smithy_eventstream::frame::{DecodedFrame, MessageFrameDecoder};
use aws_smithy_types::event_stream::Message;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::pump::StreamFailure;
use crate::transcode::BedrockEvent;

/// Decode a raw response byte stream into Bedrock events.
///
/// Framing errors and exception frames end the stream with a
/// [`StreamFailure`]; the pump turns that into the client's error chunk.
pub fn decode_event_stream<S>(input: S) -> impl Stream<Item = Result<BedrockEvent, StreamFailure>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    async_stream::stream! {
        let mut decoder = MessageFrameDecoder::new();
        let mut buffer = BytesMut::new();
        futures::pin_mut!(input);

        while let Some(chunk) = input.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    loop {
                        match decoder.decode_frame(&mut buffer) {
                            Ok(DecodedFrame::Complete(message)) => {
                                match message_to_event(&message) {
                                    Ok(event) => yield Ok(event),
                                    Err(failure) => {
                                        yield Err(failure);
                                        return;
                                    }
                                }
                            }
                            Ok(DecodedFrame::Incomplete) => break,
                            Err(e) => {
                                yield Err(StreamFailure::new(format!(
                                    "event stream framing error: {e}"
                                )));
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    yield Err(StreamFailure::from(e));
                    return;
                }
            }
        }
    }
}

fn header_value(message: &Message, name: &str) -> Option<String> {
    message.headers().iter().find_map(|h| {
        if h.name().as_str() == name {
            h.value().as_string().ok().map(|s| s.as_str().to_string())
        } else {
            None
        }
    })
}

fn message_to_event(message: &Message) -> Result<BedrockEvent, StreamFailure> {
    if header_value(message, ":message-type").as_deref() == Some("exception") {
        let exception = header_value(message, ":exception-type")
            .unwrap_or_else(|| "unknown exception".to_string());
        let detail = String::from_utf8_lossy(message.payload());
        return Err(StreamFailure::new(format!("{exception}: {detail}")));
    }

    let kind = header_value(message, ":event-type").unwrap_or_else(|| "unknown".to_string());

    // Payloads are JSON on the wire; anything else is still forwarded as
    // an opaque string rather than breaking the stream
    let mut payload: Value = match serde_json::from_slice(message.payload()) {
        Ok(value) => value,
        Err(e) => {
            warn!(kind = %kind, error = %e, "Non-JSON event payload forwarded verbatim");
            Value::String(String::from_utf8_lossy(message.payload()).into_owned())
        }
    };

    decode_binary_fields(&mut payload);

    Ok(BedrockEvent::new(kind, payload))
}

/// Replace base64 `bytes` fields with their decoded text.
///
/// InvokeModel stream chunks carry the model's JSON fragment base64-coded
/// under `bytes`; the wire contract forwards it as readable text.
fn decode_binary_fields(payload: &mut Value) {
    match payload {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if key == "bytes" {
                    if let Some(encoded) = value.as_str() {
                        if let Ok(decoded) = BASE64.decode(encoded) {
                            *value = Value::String(String::from_utf8_lossy(&decoded).into_owned());
                            continue;
                        }
                    }
                }
                decode_binary_fields(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                decode_binary_fields(item);
            }
        }
        _ => {}
    }
}
