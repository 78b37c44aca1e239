//! Bedrock proxy endpoints
//!
//! Dispatchers for the Bedrock runtime and agent-runtime surfaces.
//! Operation names from the URL are normalized and resolved through the
//! startup registry; whether a call streams is a property of the resolved
//! operation, never inferred from the request body.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    error::{AppError, AppResult},
    logging::RequestContext,
    pump::pump,
    transcode::BedrockTranscoder,
    upstream::{operation_to_method, resolve_operation, BedrockResponse, Service},
    usage::UsageState,
    AppState,
};

/// Handle Bedrock runtime operations (`InvokeModel`, `Converse`, ...)
pub async fn runtime(
    State(state): State<Arc<AppState>>,
    Path(operation): Path<String>,
    body: Bytes,
) -> AppResult<Response> {
    dispatch(state, operation, body, Service::Runtime).await
}

/// Handle Bedrock agent-runtime operations (`Retrieve`, `RetrieveAndGenerate`)
pub async fn agent_runtime(
    State(state): State<Arc<AppState>>,
    Path(operation): Path<String>,
    body: Bytes,
) -> AppResult<Response> {
    dispatch(state, operation, body, Service::AgentRuntime).await
}

async fn dispatch(
    state: Arc<AppState>,
    operation: String,
    body: Bytes,
    service: Service,
) -> AppResult<Response> {
    let body: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

    let method = operation_to_method(&operation);
    let op = resolve_operation(&method, service)
        .ok_or_else(|| AppError::UnknownOperation(operation.clone()))?;

    let ctx = RequestContext::new("bedrock", op.method).with_streaming(op.streaming);
    ctx.log_request_input(&body);

    let credentials = state
        .credentials
        .get_credentials()
        .await
        .inspect_err(|e| ctx.log_error(&e.to_string()))?;

    if op.streaming {
        let events = state
            .bedrock
            .invoke_stream(op, &body, credentials.as_ref())
            .await
            .inspect_err(|e| ctx.log_error(&e.to_string()))?;

        let stream = pump(events, BedrockTranscoder::new(), ctx);
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from_stream(stream))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {e}")))
    } else {
        let response = state
            .bedrock
            .invoke(op, &body, credentials.as_ref())
            .await
            .inspect_err(|e| ctx.log_error(&e.to_string()))?;

        if !response.is_success() {
            // Pre-stream failure: relay status and body untouched
            ctx.log_error(&format!("Upstream returned status {}", response.status));
            return Err(AppError::UpstreamStatus {
                status: response.status,
                content_type: response.content_type,
                body: response.body,
            });
        }

        let usage = extract_usage(&response);
        ctx.log_request_complete(&usage);
        ctx.log_response_output(&String::from_utf8_lossy(&response.body));

        let content_type = response
            .content_type
            .unwrap_or_else(|| "application/json".to_string());
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(response.body))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {e}")))
    }
}

/// Single-pass usage extraction over a complete response.
///
/// Converse-style responses carry a `usage` object in the body;
/// InvokeModel reports counts in response headers instead.
fn extract_usage(response: &BedrockResponse) -> UsageState {
    let mut state = UsageState::new();

    match serde_json::from_slice::<Value>(&response.body) {
        Ok(payload) => {
            if let Some(usage) = payload.get("usage") {
                let input = usage.get("inputTokens").and_then(Value::as_u64).unwrap_or(0);
                let output = usage
                    .get("outputTokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                state.set_tokens(input, output);
            }
        }
        Err(e) => {
            warn!(error = %e, "Bedrock response body was not JSON");
        }
    }

    if !state.has_usage() {
        let input = response
            .header_u64("x-amzn-bedrock-input-token-count")
            .unwrap_or(0);
        let output = response
            .header_u64("x-amzn-bedrock-output-token-count")
            .unwrap_or(0);
        if input + output > 0 {
            state.set_tokens(input, output);
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn response(body: &str, headers: &[(&str, &str)]) -> BedrockResponse {
        BedrockResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_usage_from_converse_body() {
        let resp = response(
            r#"{"output":{},"usage":{"inputTokens":9,"outputTokens":21}}"#,
            &[],
        );
        let usage = extract_usage(&resp);
        assert_eq!(usage.input_tokens(), 9);
        assert_eq!(usage.output_tokens(), 21);
    }

    #[test]
    fn test_usage_from_invoke_model_headers() {
        let resp = response(
            r#"{"results":[{"outputText":"hi"}]}"#,
            &[
                ("x-amzn-bedrock-input-token-count", "5"),
                ("x-amzn-bedrock-output-token-count", "11"),
            ],
        );
        let usage = extract_usage(&resp);
        assert_eq!(usage.input_tokens(), 5);
        assert_eq!(usage.output_tokens(), 11);
    }

    #[test]
    fn test_body_usage_preferred_over_headers() {
        let resp = response(
            r#"{"usage":{"inputTokens":1,"outputTokens":2}}"#,
            &[("x-amzn-bedrock-input-token-count", "99")],
        );
        let usage = extract_usage(&resp);
        assert_eq!(usage.total_tokens(), 3);
    }

    #[test]
    fn test_no_usage_anywhere() {
        let usage = extract_usage(&response(r#"{"results":[]}"#, &[]));
        assert!(!usage.has_usage());
    }
}
