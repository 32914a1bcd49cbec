//! # OAuth2 Service
//!
//! Owns the token lifecycle so marketplace clients only ever see an opaque
//! bearer value.
//!
//! ## Refresh Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RefreshToken(platform)                          │
//! │                                                                         │
//! │  1. lock(platform)            per-platform async mutex                 │
//! │  2. current = store.get()     AuthNotConfigured if missing             │
//! │  3. grant = endpoint.refresh(current.refresh_token)                    │
//! │        └── any failure ─────► AuthRefreshFailed, store untouched       │
//! │  4. store.compare_and_swap(new, expected = current.access_token)       │
//! │        ├── swapped ─────────► new record                               │
//! │        └── lost the race ───► re-read, the newer stored record wins    │
//! │  5. unlock                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed refresh never overwrites a stored token. The mutex serialises
//! refreshes within one process; the compare-and-swap covers a second
//! process sharing the same store file.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use skeo_core::{CredentialRecord, Platform};
use skeo_db::Database;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// Lifetime assumed for a manually reset token when none is given.
pub const DEFAULT_RESET_LIFETIME_SECS: i64 = 7 * 24 * 60 * 60;

// =============================================================================
// Token Endpoint
// =============================================================================

/// Tokens returned by a platform's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// `None` when the platform keeps the previous refresh token.
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    pub scope: Option<String>,
}

/// Platform-specific half of the OAuth2 handshake.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    fn platform(&self) -> Platform;

    /// Builds the consent URL. Pure, no network call.
    fn authorization_url(&self, redirect: Option<&str>) -> SyncResult<Url>;

    /// Exchanges a refresh token for a new grant.
    async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenGrant>;
}

/// An externally obtained credential, stored as-is.
#[derive(Debug, Clone, Default)]
pub struct TokenReset {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds; defaults to [`DEFAULT_RESET_LIFETIME_SECS`].
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

impl TokenReset {
    pub fn new(access_token: impl Into<String>) -> Self {
        TokenReset {
            access_token: access_token.into(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Token retrieval, refresh and consent URLs for every configured platform.
pub struct OAuth2Service {
    db: Database,
    endpoints: HashMap<Platform, Arc<dyn TokenEndpoint>>,
    locks: HashMap<Platform, Arc<Mutex<()>>>,
}

impl OAuth2Service {
    pub fn new(db: Database) -> Self {
        OAuth2Service {
            db,
            endpoints: HashMap::new(),
            locks: Platform::MARKETPLACES
                .iter()
                .map(|p| (*p, Arc::new(Mutex::new(()))))
                .collect(),
        }
    }

    /// Registers the token endpoint for its platform.
    pub fn with_endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        let platform = endpoint.platform();
        self.locks
            .entry(platform)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        self.endpoints.insert(platform, endpoint);
        self
    }

    /// Returns the stored credential without refreshing it.
    pub async fn get_tokens(&self, platform: Platform) -> SyncResult<CredentialRecord> {
        self.db
            .credentials()
            .get(platform)
            .await?
            .ok_or(SyncError::AuthNotConfigured { platform })
    }

    /// Exchanges the stored refresh token for a new access token.
    pub async fn refresh(&self, platform: Platform) -> SyncResult<CredentialRecord> {
        let _guard = self.lock_for(platform)?.lock().await;
        let current = self.get_tokens(platform).await?;
        self.refresh_locked(current).await
    }

    /// Refresh triggered by a rejected call made with `seen_access_token`.
    ///
    /// If the store already holds a different token (another task refreshed
    /// first), that token is returned and no network call is made.
    pub async fn refresh_after_expiry(
        &self,
        platform: Platform,
        seen_access_token: &str,
    ) -> SyncResult<CredentialRecord> {
        let _guard = self.lock_for(platform)?.lock().await;
        let current = self.get_tokens(platform).await?;

        if current.access_token != seen_access_token {
            debug!(platform = %platform, "Token already refreshed by another task");
            return Ok(current);
        }

        self.refresh_locked(current).await
    }

    async fn refresh_locked(&self, current: CredentialRecord) -> SyncResult<CredentialRecord> {
        let platform = current.platform;
        let endpoint = self.endpoint(platform)?;

        if !current.has_refresh_token() {
            return Err(SyncError::AuthRefreshFailed {
                platform,
                reason: "no refresh token stored; reset the access token".into(),
            });
        }

        let grant = endpoint
            .refresh(&current.refresh_token)
            .await
            .map_err(|e| match e {
                SyncError::AuthRefreshFailed { .. } => e,
                other => SyncError::AuthRefreshFailed {
                    platform,
                    reason: other.to_string(),
                },
            })?;

        if grant.access_token.is_empty() {
            return Err(SyncError::AuthRefreshFailed {
                platform,
                reason: "token endpoint returned an empty access token".into(),
            });
        }

        let now = Utc::now();
        let mut record = CredentialRecord::new(
            platform,
            grant.access_token,
            grant.refresh_token.unwrap_or(current.refresh_token.clone()),
            now + Duration::seconds(grant.expires_in.max(0)),
        );
        record.scope = grant.scope.or(current.scope.clone());
        record.updated_at = now;

        let swapped = self
            .db
            .credentials()
            .compare_and_swap(&record, &current.access_token)
            .await?;

        if swapped {
            info!(
                platform = %platform,
                token = %record.masked_access_token(),
                expires_at = %record.expires_at,
                "Access token refreshed"
            );
            return Ok(record);
        }

        warn!(platform = %platform, "Stored token changed during refresh, keeping the newer one");
        self.get_tokens(platform).await
    }

    /// Builds the first-time consent URL for `platform`.
    pub fn authorization_url(&self, platform: Platform, redirect: Option<&str>) -> SyncResult<Url> {
        self.endpoint(platform)?.authorization_url(redirect)
    }

    /// Replaces the stored credential with an externally obtained token.
    ///
    /// Fields not supplied are reset: empty refresh token, no scope, and the
    /// default lifetime.
    pub async fn reset_access_token(
        &self,
        platform: Platform,
        reset: TokenReset,
    ) -> SyncResult<CredentialRecord> {
        let access_token = reset.access_token.trim();
        if access_token.is_empty() {
            return Err(SyncError::InvalidInput("access token must not be empty".into()));
        }
        let lifetime = reset.expires_in.unwrap_or(DEFAULT_RESET_LIFETIME_SECS);
        if lifetime <= 0 {
            return Err(SyncError::InvalidInput(format!(
                "expires_in must be positive, got {lifetime}"
            )));
        }

        let _guard = self.lock_for(platform)?.lock().await;

        let mut record = CredentialRecord::new(
            platform,
            access_token,
            reset.refresh_token.unwrap_or_default().trim(),
            Utc::now() + Duration::seconds(lifetime),
        );
        record.scope = reset.scope;

        self.db.credentials().put(&record).await?;

        info!(
            platform = %platform,
            token = %record.masked_access_token(),
            expires_at = %record.expires_at,
            has_refresh_token = record.has_refresh_token(),
            "Access token reset"
        );
        Ok(record)
    }

    fn endpoint(&self, platform: Platform) -> SyncResult<&Arc<dyn TokenEndpoint>> {
        self.endpoints.get(&platform).ok_or_else(|| {
            SyncError::InvalidConfig(format!("no OAuth2 endpoint configured for {platform}"))
        })
    }

    fn lock_for(&self, platform: Platform) -> SyncResult<&Arc<Mutex<()>>> {
        self.locks.get(&platform).ok_or_else(|| {
            SyncError::InvalidInput(format!("{platform} does not use OAuth2"))
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
