//! Request logging utilities
//!
//! Provides structured logging with correlation IDs for tracing requests
//! through the proxy.

use std::time::Instant;

use tracing::{error, info};
use uuid::Uuid;

use crate::usage::UsageState;

/// Context for tracking a request through the system
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request (for log correlation)
    pub trace_id: String,
    /// When the request started
    pub start_time: Instant,
    /// Upstream provider handling this request
    pub provider: &'static str,
    /// Operation or deployment being invoked
    pub operation: String,
    /// Whether this is a streaming request
    pub streaming: bool,
}

impl RequestContext {
    pub fn new(provider: &'static str, operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string()[..8].to_string(), // Short ID for readability
            start_time: Instant::now(),
            provider,
            operation: operation.into(),
            streaming: false,
        }
    }

    /// Mark this as a streaming request
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    /// Log the incoming request body
    pub fn log_request_input(&self, body: &serde_json::Value) {
        info!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            operation = %self.operation,
            streaming = %self.streaming,
            input = %body,
            "Request received"
        );
    }

    /// Log completion of a non-streaming request
    pub fn log_request_complete(&self, usage: &UsageState) {
        if usage.has_usage() {
            info!(
                trace_id = %self.trace_id,
                provider = %self.provider,
                operation = %self.operation,
                input_tokens = %usage.input_tokens(),
                output_tokens = %usage.output_tokens(),
                total_tokens = %usage.total_tokens(),
                elapsed_ms = %self.elapsed_ms(),
                "Request finished"
            );
        }
    }

    /// Log the full body of a non-streaming response
    pub fn log_response_output(&self, body: &str) {
        info!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            operation = %self.operation,
            output = %body,
            "Response output"
        );
    }

    /// Final accounting line for a stream; called exactly once per stream
    pub fn log_stream_usage(&self, usage: &UsageState) {
        if usage.has_usage() {
            info!(
                trace_id = %self.trace_id,
                provider = %self.provider,
                operation = %self.operation,
                input_tokens = %usage.input_tokens(),
                output_tokens = %usage.output_tokens(),
                total_tokens = %usage.total_tokens(),
                elapsed_ms = %self.elapsed_ms(),
                "Stream finished"
            );
        }
        info!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            operation = %self.operation,
            output = %usage.text(),
            "Stream output"
        );
    }

    /// Log request failure
    pub fn log_error(&self, error: &str) {
        error!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            operation = %self.operation,
            streaming = %self.streaming,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Request failed"
        );
    }
}
