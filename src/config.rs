//! Configuration management for Janus
//!
//! Configuration is loaded from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Azure OpenAI base endpoint (no trailing slash)
    pub azure_endpoint: String,
    /// Default api-version appended when the client omits one
    pub azure_api_version: Option<String>,

    /// AWS region for Bedrock and STS calls
    pub aws_region: String,
    /// Optional role to assume before calling Bedrock; direct credentials
    /// from the default provider chain apply when unset
    pub aws_role_arn: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("JANUS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("JANUS_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid JANUS_PORT")?,

            azure_endpoint: env::var("AZURE_OPENAI_ENDPOINT")
                .unwrap_or_else(|_| "https://YOUR_RESOURCE_NAME.openai.azure.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            azure_api_version: env::var("AZURE_OPENAI_API_VERSION").ok(),

            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "eu-central-1".to_string()),
            aws_role_arn: env::var("AWS_ROLE_ARN").ok().filter(|v| !v.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        env::remove_var("JANUS_HOST");
        env::remove_var("JANUS_PORT");
        env::remove_var("AWS_ROLE_ARN");
        env::set_var("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/");

        let config = Config::from_env().unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        // Trailing slash is stripped so URL joining stays predictable
        assert_eq!(config.azure_endpoint, "https://example.openai.azure.com");
        assert!(config.aws_role_arn.is_none());

        env::remove_var("AZURE_OPENAI_ENDPOINT");
    }
}
