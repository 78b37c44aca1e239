//! Azure OpenAI forwarder
//!
//! Forwards requests to the configured Azure OpenAI endpoint, preserving
//! the client's path, query and headers. The caller decides what to do
//! with the response (stream it, relay it, or read it whole).

use axum::http::{header, HeaderMap};
use tracing::{debug, error};

use crate::{
    config::Config,
    error::{AppError, AppResult},
};

/// Client for the Azure-hosted OpenAI-compatible endpoint
pub struct AzureClient {
    client: reqwest::Client,
    base_url: String,
    default_api_version: Option<String>,
}

impl AzureClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.azure_endpoint.clone(),
            default_api_version: config.azure_api_version.clone(),
        }
    }

    /// Forward a request body to `{base}/{path}?{query}`.
    ///
    /// Errors establishing the call map to upstream-unavailable; any
    /// response, success or not, is handed back untouched.
    pub async fn forward(
        &self,
        path: &str,
        query: Option<&str>,
        incoming_headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> AppResult<reqwest::Response> {
        let url = self.build_url(path, query);
        debug!(url = %url, "Forwarding request to Azure OpenAI");

        let headers = self.build_proxy_headers(incoming_headers);

        self.client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Failed to connect to Azure OpenAI");
                AppError::UpstreamConnect("Upstream connection failed".to_string())
            })
    }

    fn build_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        match query {
            Some(q) if !q.is_empty() => {
                url.push('?');
                url.push_str(q);
                if !q.contains("api-version=") {
                    if let Some(version) = &self.default_api_version {
                        url.push_str("&api-version=");
                        url.push_str(version);
                    }
                }
            }
            _ => {
                if let Some(version) = &self.default_api_version {
                    url.push_str("?api-version=");
                    url.push_str(version);
                }
            }
        }
        url
    }

    /// Copy client headers, dropping the ones the proxy must own.
    ///
    /// `host` would break SNI against the Azure endpoint; `content-length`
    /// is recomputed for the re-serialized body.
    fn build_proxy_headers(&self, incoming: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in incoming {
            if name == header::HOST || name == header::CONTENT_LENGTH {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn client(api_version: Option<&str>) -> AzureClient {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 0,
            azure_endpoint: "https://example.openai.azure.com".into(),
            azure_api_version: api_version.map(String::from),
            aws_region: "eu-central-1".into(),
            aws_role_arn: None,
        };
        AzureClient::new(reqwest::Client::new(), &config)
    }

    #[test]
    fn test_build_url_passes_query_through() {
        let url = client(None).build_url(
            "openai/deployments/gpt-4o/chat/completions",
            Some("api-version=2024-02-01"),
        );
        assert_eq!(
            url,
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-02-01"
        );
    }

    #[test]
    fn test_build_url_appends_default_api_version() {
        let url = client(Some("2024-06-01")).build_url("openai/deployments/d/chat/completions", None);
        assert!(url.ends_with("?api-version=2024-06-01"));

        let url = client(Some("2024-06-01"))
            .build_url("openai/deployments/d/chat/completions", Some("foo=bar"));
        assert!(url.ends_with("?foo=bar&api-version=2024-06-01"));
    }

    #[test]
    fn test_client_api_version_not_overridden() {
        let url = client(Some("2024-06-01")).build_url(
            "openai/deployments/d/chat/completions",
            Some("api-version=2023-12-01"),
        );
        assert!(url.contains("api-version=2023-12-01"));
        assert!(!url.contains("2024-06-01"));
    }

    #[test]
    fn test_host_and_content_length_stripped() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        incoming.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        incoming.insert("api-key", HeaderValue::from_static("secret"));

        let headers = client(None).build_proxy_headers(&incoming);

        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(headers.get("api-key").unwrap(), "secret");
    }
}
