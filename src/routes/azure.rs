//! Azure OpenAI proxy endpoint
//!
//! Catch-all dispatcher for Azure OpenAI paths. Support is deliberately
//! narrowed to chat completions: any other path shape is rejected rather
//! than half-proxied.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    error::{AppError, AppResult},
    logging::RequestContext,
    pump::pump,
    streaming::sse_line_stream,
    transcode::{self, AzureSseTranscoder},
    usage::UsageState,
    AppState,
};

/// Resolve the deployment id from a chat-completions path.
///
/// Accepts only `.../deployments/{id}/chat/completions`.
fn resolve_deployment(path: &str) -> Option<&str> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let idx = segments.iter().position(|s| *s == "deployments")?;
    match segments.get(idx + 1..)? {
        [id, "chat", "completions"] if !id.is_empty() => Some(*id),
        _ => None,
    }
}

/// Force `stream_options.include_usage` so the final stream chunk carries
/// usage, overriding any conflicting caller-supplied value.
fn force_include_usage(body: &mut Value) {
    match body.get_mut("stream_options") {
        Some(Value::Object(options)) => {
            options.insert("include_usage".to_string(), Value::Bool(true));
        }
        _ => {
            body["stream_options"] = json!({"include_usage": true});
        }
    }
}

/// Handle Azure OpenAI chat-completion requests
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let deployment = resolve_deployment(&path)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unsupported path {path}; expected deployments/{{id}}/chat/completions"
            ))
        })?
        .to_string();

    if headers.get("api-key").is_none() {
        return Err(AppError::MissingApiKey);
    }

    let mut body: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
    let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    if streaming {
        force_include_usage(&mut body);
    }

    let ctx = RequestContext::new("azure", deployment).with_streaming(streaming);
    ctx.log_request_input(&body);

    let response = state
        .azure
        .forward(&path, query.as_deref(), &headers, &body)
        .await
        .inspect_err(|e| ctx.log_error(&e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        // Pre-stream failure: relay status and body untouched
        ctx.log_error(&format!("Upstream returned status {status}"));
        return relay_response(response);
    }

    if streaming {
        stream_response(response, ctx)
    } else {
        buffered_response(response, ctx).await
    }
}

/// Relay a response verbatim without transcoding
fn relay_response(response: reqwest::Response) -> AppResult<Response> {
    let mut builder = Response::builder().status(response.status());
    if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
        builder = builder.header(header::CONTENT_TYPE, content_type.clone());
    }
    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {e}")))
}

/// Pump an upstream SSE stream to the client
fn stream_response(response: reqwest::Response, ctx: RequestContext) -> AppResult<Response> {
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("text/event-stream"));

    let lines = sse_line_stream(response.bytes_stream());
    let body = Body::from_stream(pump(lines, AzureSseTranscoder::new(), ctx));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {e}")))
}

/// Read a non-streaming response whole, account usage, return it as-is
async fn buffered_response(response: reqwest::Response, ctx: RequestContext) -> AppResult<Response> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/json"));
    let bytes = response.bytes().await?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(payload) => {
            let mut usage = UsageState::new();
            transcode::azure::extract_usage(&payload, &mut usage);
            ctx.log_request_complete(&usage);
            ctx.log_response_output(&String::from_utf8_lossy(&bytes));
        }
        Err(e) => {
            warn!(trace_id = %ctx.trace_id, error = %e, "Azure response was not JSON");
        }
    }

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_deployment() {
        assert_eq!(
            resolve_deployment("openai/deployments/gpt-4o/chat/completions"),
            Some("gpt-4o")
        );
        assert_eq!(
            resolve_deployment("/openai/deployments/my-deploy/chat/completions"),
            Some("my-deploy")
        );
    }

    #[test]
    fn test_resolve_deployment_rejects_other_shapes() {
        // Only chat completions are supported through this proxy
        assert_eq!(resolve_deployment("openai/deployments/gpt-4o/completions"), None);
        assert_eq!(resolve_deployment("openai/deployments/gpt-4o/embeddings"), None);
        assert_eq!(resolve_deployment("openai/models"), None);
        assert_eq!(
            resolve_deployment("openai/deployments/gpt-4o/chat/completions/extra"),
            None
        );
        assert_eq!(resolve_deployment(""), None);
    }

    #[test]
    fn test_force_include_usage_inserts_options() {
        let mut body = json!({"stream": true});
        force_include_usage(&mut body);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_force_include_usage_overrides_caller_value() {
        let mut body = json!({"stream": true, "stream_options": {"include_usage": false}});
        force_include_usage(&mut body);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_force_include_usage_replaces_non_object() {
        let mut body = json!({"stream": true, "stream_options": "bogus"});
        force_include_usage(&mut body);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }
}
