//! Janus - Async AI proxy for Azure OpenAI and AWS Bedrock
//!
//! This library provides the core functionality for the Janus proxy
//! server: streaming response transcoding with token usage accounting,
//! and expiry-aware caching of assumed-role credentials.

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod pump;
pub mod routes;
pub mod streaming;
pub mod transcode;
pub mod upstream;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use aws_config::{BehaviorVersion, Region};

pub use crate::config::Config;
pub use crate::credentials::{CredentialCache, CredentialEntry};
pub use crate::error::{AppError, AppResult};
pub use crate::upstream::{AzureClient, BedrockRuntime, SigV4BedrockClient, StsAssumeRole};
pub use crate::usage::UsageState;

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub http_client: reqwest::Client,
    pub start_time: Instant,
    pub azure: AzureClient,
    pub bedrock: Arc<dyn BedrockRuntime>,
    pub credentials: Arc<CredentialCache>,
}

impl AppState {
    /// Create application state with production collaborators
    pub async fn new(config: Config) -> Result<Self> {
        // One pooled HTTP client for the whole process. The 60s timeouts
        // bound call establishment and per-read stalls without capping
        // total stream duration.
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .connect_timeout(Duration::from_secs(60))
            .read_timeout(Duration::from_secs(60))
            .build()?;

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()))
            .load()
            .await;

        let azure = AzureClient::new(http_client.clone(), &config);
        let bedrock: Arc<dyn BedrockRuntime> = Arc::new(SigV4BedrockClient::new(
            http_client.clone(),
            &config.aws_region,
            &sdk_config,
        ));
        let credentials = Arc::new(CredentialCache::new(
            config.aws_role_arn.clone(),
            Arc::new(StsAssumeRole::new(&sdk_config)),
        ));

        Ok(Self {
            config,
            http_client,
            start_time: Instant::now(),
            azure,
            bedrock,
            credentials,
        })
    }

    /// Create application state with injected collaborators.
    ///
    /// Lets tests substitute fakes for the Bedrock transport and the
    /// credential refresh call.
    pub fn with_collaborators(
        config: Config,
        http_client: reqwest::Client,
        bedrock: Arc<dyn BedrockRuntime>,
        credentials: Arc<CredentialCache>,
    ) -> Self {
        let azure = AzureClient::new(http_client.clone(), &config);
        Self {
            config,
            http_client,
            start_time: Instant::now(),
            azure,
            bedrock,
            credentials,
        }
    }
}
