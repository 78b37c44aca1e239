//! Bedrock runtime transport
//!
//! Speaks the Bedrock REST API with SigV4-signed requests. Operations are
//! resolved through an explicit registry populated at startup; the proxy
//! never dispatches on reflection-style attribute lookup, so an unknown
//! operation is a plain lookup miss.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::SystemTime;

use anyhow::anyhow;
use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use bytes::Bytes;
use futures::Stream;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, error};

use super::eventstream::decode_event_stream;
use crate::{
    credentials::CredentialEntry,
    error::{AppError, AppResult},
    pump::StreamFailure,
    transcode::BedrockEvent,
};

/// SigV4 signing name shared by all Bedrock endpoints
const SIGNING_NAME: &str = "bedrock";

const EVENT_STREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

/// Which Bedrock service endpoint an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Runtime,
    AgentRuntime,
}

impl Service {
    fn host_prefix(&self) -> &'static str {
        match self {
            Service::Runtime => "bedrock-runtime",
            Service::AgentRuntime => "bedrock-agent-runtime",
        }
    }
}

/// How an operation's request path is derived from the call arguments
#[derive(Debug, Clone, Copy)]
enum PathTemplate {
    /// `/model/{modelId}/<suffix>`
    Model(&'static str),
    /// `/knowledgebases/{knowledgeBaseId}/<suffix>`
    KnowledgeBase(&'static str),
    /// A fixed path
    Fixed(&'static str),
}

/// One registry entry: a Bedrock operation the proxy knows how to call.
#[derive(Debug, Clone, Copy)]
pub struct Operation {
    /// Normalized snake_case identifier (`converse_stream`, ...)
    pub method: &'static str,
    pub service: Service,
    /// Streaming is a property of the operation, never inferred from the
    /// request body
    pub streaming: bool,
    path: PathTemplate,
}

impl Operation {
    /// Build the REST request path from the call arguments.
    pub fn request_path(&self, body: &Value) -> AppResult<String> {
        match self.path {
            PathTemplate::Model(suffix) => {
                let model_id = body
                    .get("modelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AppError::BadRequest("modelId is required".to_string()))?;
                Ok(format!("/model/{model_id}/{suffix}"))
            }
            PathTemplate::KnowledgeBase(suffix) => {
                let kb_id = body
                    .get("knowledgeBaseId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AppError::BadRequest("knowledgeBaseId is required".to_string())
                    })?;
                Ok(format!("/knowledgebases/{kb_id}/{suffix}"))
            }
            PathTemplate::Fixed(path) => Ok(path.to_string()),
        }
    }
}

static OPERATIONS: Lazy<HashMap<&'static str, Operation>> = Lazy::new(|| {
    [
        Operation {
            method: "invoke_model",
            service: Service::Runtime,
            streaming: false,
            path: PathTemplate::Model("invoke"),
        },
        Operation {
            method: "invoke_model_with_response_stream",
            service: Service::Runtime,
            streaming: true,
            path: PathTemplate::Model("invoke-with-response-stream"),
        },
        Operation {
            method: "converse",
            service: Service::Runtime,
            streaming: false,
            path: PathTemplate::Model("converse"),
        },
        Operation {
            method: "converse_stream",
            service: Service::Runtime,
            streaming: true,
            path: PathTemplate::Model("converse-stream"),
        },
        Operation {
            method: "retrieve",
            service: Service::AgentRuntime,
            streaming: false,
            path: PathTemplate::KnowledgeBase("retrieve"),
        },
        Operation {
            method: "retrieve_and_generate",
            service: Service::AgentRuntime,
            streaming: false,
            path: PathTemplate::Fixed("/retrieveAndGenerate"),
        },
    ]
    .into_iter()
    .map(|op| (op.method, op))
    .collect()
});

/// Normalize a URL operation name to its method identifier.
///
/// PascalCase gets `_` inserted before each interior uppercase letter and
/// is lowercased; kebab-case dashes become underscores.
pub fn operation_to_method(operation: &str) -> String {
    let mut out = String::with_capacity(operation.len() + 4);
    for (i, c) in operation.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

/// Look up a normalized method name in the registry, scoped to a service.
pub fn resolve_operation(method: &str, service: Service) -> Option<&'static Operation> {
    OPERATIONS.get(method).filter(|op| op.service == service)
}

/// A complete (non-streaming) Bedrock response.
#[derive(Debug, Clone)]
pub struct BedrockResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Response headers with lowercase names; carries the
    /// `x-amzn-bedrock-*-token-count` accounting headers
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl BedrockResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers.get(name).and_then(|v| v.parse().ok())
    }
}

/// Stream of decoded Bedrock events
pub type BedrockEventStream = Pin<Box<dyn Stream<Item = Result<BedrockEvent, StreamFailure>> + Send>>;

/// The Bedrock runtime seam.
///
/// Dispatch and tests depend on this trait, not on the transport.
#[async_trait]
pub trait BedrockRuntime: Send + Sync {
    /// Execute a non-streaming operation and return the full response
    async fn invoke(
        &self,
        operation: &Operation,
        body: &Value,
        credentials: Option<&CredentialEntry>,
    ) -> AppResult<BedrockResponse>;

    /// Execute a streaming operation.
    ///
    /// A non-success status received before the stream begins surfaces as
    /// an [`AppError::UpstreamStatus`] carrying the raw body.
    async fn invoke_stream(
        &self,
        operation: &Operation,
        body: &Value,
        credentials: Option<&CredentialEntry>,
    ) -> AppResult<BedrockEventStream>;
}

/// Production transport: SigV4-signed requests against the regional
/// Bedrock endpoints, falling back to the default credential chain when
/// no assumed-role credentials are supplied.
pub struct SigV4BedrockClient {
    http: reqwest::Client,
    region: String,
    default_credentials: Option<aws_credential_types::provider::SharedCredentialsProvider>,
    endpoint_override: Option<String>,
}

impl SigV4BedrockClient {
    pub fn new(http: reqwest::Client, region: &str, sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            http,
            region: region.to_string(),
            default_credentials: sdk_config.credentials_provider(),
            endpoint_override: None,
        }
    }

    /// Point all requests at a fixed endpoint instead of the regional
    /// host. Used against local fakes.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    async fn signing_credentials(
        &self,
        credentials: Option<&CredentialEntry>,
    ) -> AppResult<Credentials> {
        if let Some(entry) = credentials {
            return Ok(Credentials::new(
                entry.access_key_id.clone(),
                entry.secret_access_key.clone(),
                Some(entry.session_token.clone()),
                None,
                "assumed-role",
            ));
        }

        let provider = self.default_credentials.as_ref().ok_or_else(|| {
            AppError::UpstreamConnect("No AWS credentials available".to_string())
        })?;
        provider.provide_credentials().await.map_err(|e| {
            AppError::UpstreamConnect(format!("Failed to resolve AWS credentials: {e}"))
        })
    }

    fn request_url(&self, operation: &Operation, path: &str) -> String {
        match &self.endpoint_override {
            Some(endpoint) => format!("{}{path}", endpoint.trim_end_matches('/')),
            None => format!(
                "https://{}.{}.amazonaws.com{path}",
                operation.service.host_prefix(),
                self.region
            ),
        }
    }

    /// Shape the REST payload from boto3-style keyword arguments.
    ///
    /// Routing and content-negotiation keys (`modelId`, `knowledgeBaseId`,
    /// `contentType`, `accept`) are consumed by the path and headers; a
    /// lone remaining `body` argument (InvokeModel style) is sent as-is,
    /// anything else is serialized as the JSON request document.
    fn request_payload(body: &Value) -> AppResult<(Vec<u8>, String)> {
        let mut map = body.as_object().cloned().unwrap_or_default();
        map.remove("modelId");
        map.remove("knowledgeBaseId");
        map.remove("accept");
        let content_type = map
            .remove("contentType")
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "application/json".to_string());

        let payload = if map.len() == 1 && map.contains_key("body") {
            match map.remove("body").expect("key checked above") {
                Value::String(raw) => raw.into_bytes(),
                other => serde_json::to_vec(&other)?,
            }
        } else {
            serde_json::to_vec(&Value::Object(map))?
        };

        Ok((payload, content_type))
    }

    async fn send(
        &self,
        operation: &Operation,
        body: &Value,
        credentials: Option<&CredentialEntry>,
        accept: &str,
    ) -> AppResult<reqwest::Response> {
        let path = operation.request_path(body)?;
        let url = self.request_url(operation, &path);
        let (payload, content_type) = Self::request_payload(body)?;

        let signing_credentials = self.signing_credentials(credentials).await?;
        let identity = signing_credentials.into();
        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(SIGNING_NAME)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| AppError::Internal(anyhow!("Failed to build signing params: {e}")))?
            .into();

        let signed_headers = [("content-type", content_type.as_str()), ("accept", accept)];
        let signable = SignableRequest::new(
            "POST",
            url.clone(),
            signed_headers.iter().map(|(k, v)| (*k, *v)),
            SignableBody::Bytes(&payload),
        )
        .map_err(|e| AppError::Internal(anyhow!("Failed to build signable request: {e}")))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| AppError::Internal(anyhow!("Request signing failed: {e}")))?
            .into_parts();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, header_value(&content_type)?);
        headers.insert(ACCEPT, header_value(accept)?);
        for (name, value) in instructions.headers() {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| AppError::Internal(anyhow!("Invalid signed header: {e}")))?,
                header_value(value)?,
            );
        }

        debug!(url = %url, method = %operation.method, "Sending request to Bedrock");
        self.http
            .post(&url)
            .headers(headers)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Failed to connect to Bedrock");
                AppError::UpstreamConnect("Upstream connection failed".to_string())
            })
    }
}

fn header_value(value: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Internal(anyhow!("Invalid header value: {e}")))
}

#[async_trait]
impl BedrockRuntime for SigV4BedrockClient {
    async fn invoke(
        &self,
        operation: &Operation,
        body: &Value,
        credentials: Option<&CredentialEntry>,
    ) -> AppResult<BedrockResponse> {
        let response = self
            .send(operation, body, credentials, "application/json")
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(BedrockResponse {
            status,
            content_type,
            headers,
            body,
        })
    }

    async fn invoke_stream(
        &self,
        operation: &Operation,
        body: &Value,
        credentials: Option<&CredentialEntry>,
    ) -> AppResult<BedrockEventStream> {
        let response = self
            .send(operation, body, credentials, EVENT_STREAM_CONTENT_TYPE)
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Transcoding only ever runs on a confirmed-successful stream;
            // anything else is relayed to the client untouched
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let body = response
                .bytes()
                .await
                .unwrap_or_else(|_| Bytes::from_static(b"Failed to read error response"));
            return Err(AppError::UpstreamStatus {
                status: status.as_u16(),
                content_type,
                body,
            });
        }

        Ok(Box::pin(decode_event_stream(response.bytes_stream())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_operation_to_method_pascal_case() {
        assert_eq!(operation_to_method("ConverseStream"), "converse_stream");
        assert_eq!(operation_to_method("InvokeModel"), "invoke_model");
        assert_eq!(
            operation_to_method("InvokeModelWithResponseStream"),
            "invoke_model_with_response_stream"
        );
        assert_eq!(operation_to_method("RetrieveAndGenerate"), "retrieve_and_generate");
    }

    #[test]
    fn test_operation_to_method_kebab_and_snake() {
        assert_eq!(operation_to_method("converse-stream"), "converse_stream");
        assert_eq!(operation_to_method("invoke_model"), "invoke_model");
    }

    #[test]
    fn test_registry_resolves_known_operations() {
        let op = resolve_operation("converse_stream", Service::Runtime).unwrap();
        assert!(op.streaming);

        let op = resolve_operation("invoke_model", Service::Runtime).unwrap();
        assert!(!op.streaming);

        let op = resolve_operation("retrieve_and_generate", Service::AgentRuntime).unwrap();
        assert!(!op.streaming);
    }

    #[test]
    fn test_registry_misses_unknown_and_wrong_service() {
        assert!(resolve_operation("frobnicate", Service::Runtime).is_none());
        // Agent-runtime operations are not reachable through the runtime
        // endpoint and vice versa
        assert!(resolve_operation("retrieve", Service::Runtime).is_none());
        assert!(resolve_operation("converse", Service::AgentRuntime).is_none());
    }

    #[test]
    fn test_request_path_from_model_id() {
        let op = resolve_operation("invoke_model_with_response_stream", Service::Runtime).unwrap();
        let path = op
            .request_path(&json!({"modelId": "anthropic.claude-v2", "body": "{}"}))
            .unwrap();
        assert_eq!(path, "/model/anthropic.claude-v2/invoke-with-response-stream");
    }

    #[test]
    fn test_request_path_missing_model_id_is_client_error() {
        let op = resolve_operation("converse", Service::Runtime).unwrap();
        let err = op.request_path(&json!({"messages": []})).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_request_path_knowledge_base() {
        let op = resolve_operation("retrieve", Service::AgentRuntime).unwrap();
        let path = op
            .request_path(&json!({"knowledgeBaseId": "KB123", "retrievalQuery": {"text": "q"}}))
            .unwrap();
        assert_eq!(path, "/knowledgebases/KB123/retrieve");
    }

    #[test]
    fn test_payload_unwraps_invoke_model_body() {
        let body = json!({
            "modelId": "amazon.titan-text-express-v1",
            "contentType": "application/json",
            "body": "{\"inputText\":\"hello\"}"
        });
        let (payload, content_type) = SigV4BedrockClient::request_payload(&body).unwrap();
        assert_eq!(payload, b"{\"inputText\":\"hello\"}");
        assert_eq!(content_type, "application/json");
    }

    #[test]
    fn test_payload_serializes_converse_arguments() {
        let body = json!({
            "modelId": "anthropic.claude-v2",
            "messages": [{"role": "user", "content": [{"text": "hi"}]}],
            "inferenceConfig": {"maxTokens": 10}
        });
        let (payload, _) = SigV4BedrockClient::request_payload(&body).unwrap();
        let parsed: Value = serde_json::from_slice(&payload).unwrap();

        assert!(parsed.get("modelId").is_none());
        assert_eq!(parsed["messages"][0]["role"], "user");
        assert_eq!(parsed["inferenceConfig"]["maxTokens"], 10);
    }

    #[test]
    fn test_response_token_headers() {
        let mut headers = HashMap::new();
        headers.insert("x-amzn-bedrock-input-token-count".to_string(), "11".to_string());
        headers.insert("x-amzn-bedrock-output-token-count".to_string(), "29".to_string());
        let response = BedrockResponse {
            status: 200,
            content_type: Some("application/json".into()),
            headers,
            body: Bytes::new(),
        };

        assert!(response.is_success());
        assert_eq!(response.header_u64("x-amzn-bedrock-input-token-count"), Some(11));
        assert_eq!(response.header_u64("x-amzn-bedrock-output-token-count"), Some(29));
        assert_eq!(response.header_u64("missing"), None);
    }
}
