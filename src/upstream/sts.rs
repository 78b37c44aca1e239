//! STS role assumption
//!
//! Production implementation of the credential cache's refresh call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    credentials::{AssumeRole, CredentialEntry},
    error::{AppError, AppResult},
};

/// Role assumption backed by AWS STS
pub struct StsAssumeRole {
    client: aws_sdk_sts::Client,
}

impl StsAssumeRole {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl AssumeRole for StsAssumeRole {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_seconds: i32,
    ) -> AppResult<CredentialEntry> {
        debug!(role_arn = %role_arn, "Assuming role via STS");

        let response = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(duration_seconds)
            .send()
            .await
            .map_err(|e| AppError::UpstreamConnect(format!("Role assumption failed: {e}")))?;

        let credentials = response.credentials().ok_or_else(|| {
            AppError::UpstreamConnect("Role assumption returned no credentials".to_string())
        })?;

        let expiration = credentials.expiration();
        let expires_at: DateTime<Utc> =
            DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos()).ok_or_else(
                || AppError::UpstreamConnect("Role assumption returned invalid expiry".to_string()),
            )?;

        Ok(CredentialEntry {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expires_at,
        })
    }
}
