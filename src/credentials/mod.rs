//! Temporary credential cache
//!
//! Holds the single set of assumed-role credentials used for Bedrock
//! calls, refreshing them through a role-assumption call before they
//! reach their expiry margin. The cache is the only mutable state shared
//! across concurrent requests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::AppResult;

/// Session name passed to the role-assumption call
pub const SESSION_NAME: &str = "ProxySession";

/// Validity requested for assumed credentials
pub const SESSION_DURATION_SECONDS: i32 = 3600;

/// Entries within this margin of expiry are treated as already expired
pub const EXPIRY_MARGIN_SECONDS: i64 = 300;

/// One set of temporary security credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialEntry {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// Absolute expiration reported by the issuer
    pub expires_at: DateTime<Utc>,
}

impl CredentialEntry {
    /// Whether this entry may still be served at `now`.
    ///
    /// An entry is never served inside the safety margin of its expiry.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECONDS)
    }
}

/// The role-assumption collaborator.
///
/// Production uses STS; tests substitute counting fakes.
#[async_trait]
pub trait AssumeRole: Send + Sync {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_seconds: i32,
    ) -> AppResult<CredentialEntry>;
}

/// Expiry-aware cache for one assumed role.
///
/// Reads of a valid entry take a shared lock only. Refreshes are
/// single-flight: concurrent callers that observe a missing or expiring
/// entry serialize on the refresh mutex, and all but the first find the
/// fresh entry on re-check.
pub struct CredentialCache {
    role_arn: Option<String>,
    provider: Arc<dyn AssumeRole>,
    entry: RwLock<Option<CredentialEntry>>,
    refresh: Mutex<()>,
}

impl CredentialCache {
    pub fn new(role_arn: Option<String>, provider: Arc<dyn AssumeRole>) -> Self {
        Self {
            role_arn,
            provider,
            entry: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Get credentials for the configured role.
    ///
    /// Returns `None` immediately when no role is configured — the
    /// upstream call then runs on default credentials and no network call
    /// is ever made here. A failed refresh propagates as an
    /// upstream-unavailable error and leaves the cache unchanged.
    pub async fn get_credentials(&self) -> AppResult<Option<CredentialEntry>> {
        let Some(role_arn) = &self.role_arn else {
            return Ok(None);
        };

        if let Some(entry) = self.read_current().await {
            return Ok(Some(entry));
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited on the guard
        if let Some(entry) = self.read_current().await {
            debug!(role_arn = %role_arn, "Credential refresh satisfied by concurrent caller");
            return Ok(Some(entry));
        }

        let entry = self
            .provider
            .assume_role(role_arn, SESSION_NAME, SESSION_DURATION_SECONDS)
            .await?;
        info!(
            role_arn = %role_arn,
            expires_at = %entry.expires_at,
            "Assumed role credentials refreshed"
        );
        *self.entry.write().await = Some(entry.clone());
        Ok(Some(entry))
    }

    async fn read_current(&self) -> Option<CredentialEntry> {
        let guard = self.entry.read().await;
        guard
            .as_ref()
            .filter(|entry| entry.is_current(Utc::now()))
            .cloned()
    }
}
