//! # Entry Points
//!
//! The operations the command line exposes. Each one opens the token store,
//! does its work and closes the store again, whatever the outcome.
//!
//! ```text
//! ┌──────────────────────────────────────────┬─────────────────────────────┐
//! │ procedure                                │ touches                     │
//! ├──────────────────────────────────────────┼─────────────────────────────┤
//! │ do_cleanup_procedure                     │ storefront, store           │
//! │ do_sync_procedure(read_only)             │ storefront, marketplaces,   │
//! │                                          │ store                       │
//! │ do_generate_shopee_shop_authorization_url│ nothing (pure)              │
//! │ do_lazada_reset_access_token             │ store                       │
//! │ do_check_config                          │ store (read only)           │
//! └──────────────────────────────────────────┴─────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use skeo_core::{CredentialRecord, Platform, SCRIPT_VERSION};
use skeo_db::{Database, DbConfig};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::engine::{CancelToken, EngineSettings, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::marketplace::{
    AuthSession, ClientOptions, LazadaClient, LazadaTokenEndpoint, MarketplaceClient, ShopeeClient,
    ShopeeTokenEndpoint,
};
use crate::oauth2::{OAuth2Service, TokenEndpoint, TokenReset};
use crate::storefront::OpencartClient;
use crate::summary::{CleanupReport, SyncReport};

// =============================================================================
// Procedures
// =============================================================================

/// Removes orphaned and unlisted mappings, closes dead passes and purges
/// old logs. `cancel` is checked between steps.
pub async fn do_cleanup_procedure(
    config: &SyncConfig,
    cancel: CancelToken,
) -> SyncResult<CleanupReport> {
    let http = http_client(config)?;
    let source = Arc::new(OpencartClient::new(http, config.opencart()?));

    with_store(config, |db| async move {
        SyncEngine::new(db, source, EngineSettings::from_config(&config.sync))
            .with_cancel(cancel)
            .cleanup()
            .await
    })
    .await
}

/// Runs one sync pass across every configured marketplace.
pub async fn do_sync_procedure(
    config: &SyncConfig,
    read_only: bool,
    cancel: CancelToken,
) -> SyncResult<SyncReport> {
    let http = http_client(config)?;
    let source = Arc::new(OpencartClient::new(http.clone(), config.opencart()?));

    with_store(config, |db| async move {
        let oauth = Arc::new(oauth_service(config, db.clone(), &http));
        let mut engine = SyncEngine::new(db, source, EngineSettings::from_config(&config.sync))
            .with_cancel(cancel);

        for platform in config.enabled_marketplaces() {
            match marketplace_client(config, &http, oauth.clone(), platform).await {
                Ok(client) => engine = engine.with_client(client),
                Err(e @ SyncError::AuthNotConfigured { .. }) => {
                    warn!(platform = %platform, error = %e, "Skipping marketplace");
                    engine = engine.with_unavailable(platform, e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        engine.sync(read_only).await
    })
    .await
}

/// Builds the Shopee shop authorization URL. No network call is made.
pub fn do_generate_shopee_shop_authorization_url(
    config: &SyncConfig,
    redirect: Option<&str>,
) -> SyncResult<Url> {
    let endpoint = ShopeeTokenEndpoint::new(http_client(config)?, config.shopee()?);
    let url = endpoint.authorization_url(redirect)?;
    info!(url = %url, "Generated Shopee authorization URL");
    Ok(url)
}

/// Replaces the stored Lazada credential with an externally obtained token.
pub async fn do_lazada_reset_access_token(
    config: &SyncConfig,
    reset: TokenReset,
) -> SyncResult<CredentialRecord> {
    config.lazada()?;
    let http = http_client(config)?;

    with_store(config, |db| async move {
        oauth_service(config, db, &http)
            .reset_access_token(Platform::Lazada, reset)
            .await
    })
    .await
}

// =============================================================================
// Configuration Check
// =============================================================================

/// Token state of one marketplace, safe to print.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub platform: Platform,
    pub authorized: bool,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds left before expiry, zero once expired.
    pub remaining_secs: Option<i64>,
    pub expired: bool,
    pub has_refresh_token: bool,
}

impl CredentialStatus {
    fn from_record(platform: Platform, record: Option<&CredentialRecord>, now: DateTime<Utc>) -> Self {
        match record {
            Some(record) => CredentialStatus {
                platform,
                authorized: true,
                access_token: Some(record.masked_access_token()),
                expires_at: Some(record.expires_at),
                remaining_secs: Some(record.remaining_at(now).num_seconds()),
                expired: record.is_expired_at(now),
                has_refresh_token: record.has_refresh_token(),
            },
            None => CredentialStatus {
                platform,
                authorized: false,
                access_token: None,
                expires_at: None,
                remaining_secs: None,
                expired: false,
                has_refresh_token: false,
            },
        }
    }
}

/// Result of `chkconfig`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigCheck {
    pub version: &'static str,
    pub sections: Vec<&'static str>,
    pub store: PathBuf,
    pub credentials: Vec<CredentialStatus>,
}

impl ConfigCheck {
    /// True when every configured marketplace has a usable credential.
    pub fn is_ready(&self) -> bool {
        self.credentials
            .iter()
            .all(|c| c.authorized && (!c.expired || c.has_refresh_token))
    }
}

/// Reports the loaded sections and the stored credential of every
/// configured marketplace.
pub async fn do_check_config(config: &SyncConfig) -> SyncResult<ConfigCheck> {
    with_store(config, |db| async move {
        let stored = db.credentials().list().await?;
        let now = Utc::now();

        let credentials = config
            .enabled_marketplaces()
            .into_iter()
            .map(|platform| {
                let record = stored.iter().find(|r| r.platform == platform);
                CredentialStatus::from_record(platform, record, now)
            })
            .collect();

        Ok(ConfigCheck {
            version: SCRIPT_VERSION,
            sections: config.sections(),
            store: config.common.store.clone(),
            credentials,
        })
    })
    .await
}

// =============================================================================
// Wiring
// =============================================================================

/// Opens the store, runs `work` and closes the store on every path.
async fn with_store<T, F, Fut>(config: &SyncConfig, work: F) -> SyncResult<T>
where
    F: FnOnce(Database) -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let db = Database::new(DbConfig::new(config.common.store.clone())).await?;
    let result = work(db.clone()).await;
    db.close().await;
    result
}

fn http_client(config: &SyncConfig) -> SyncResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(config.sync.request_timeout())
        .user_agent(format!("skeo-sync/{SCRIPT_VERSION}"))
        .build()?;
    Ok(client)
}

fn oauth_service(config: &SyncConfig, db: Database, http: &reqwest::Client) -> OAuth2Service {
    let mut service = OAuth2Service::new(db);
    if let Some(lazada) = &config.lazada {
        service = service.with_endpoint(Arc::new(LazadaTokenEndpoint::new(http.clone(), lazada)));
    }
    if let Some(shopee) = &config.shopee {
        service = service.with_endpoint(Arc::new(ShopeeTokenEndpoint::new(http.clone(), shopee)));
    }
    service
}

async fn marketplace_client(
    config: &SyncConfig,
    http: &reqwest::Client,
    oauth: Arc<OAuth2Service>,
    platform: Platform,
) -> SyncResult<Arc<dyn MarketplaceClient>> {
    let options = ClientOptions {
        with_confirm: config.sync.with_confirm,
        with_refresh: config.sync.with_refresh,
    };
    let session = AuthSession::from_store(oauth, platform, options.with_refresh).await?;

    let client: Arc<dyn MarketplaceClient> = match platform {
        Platform::Lazada => Arc::new(LazadaClient::new(http.clone(), config.lazada()?, session, options)),
        Platform::Shopee => Arc::new(ShopeeClient::new(http.clone(), config.shopee()?, session, options)),
        Platform::Opencart => {
            return Err(SyncError::InvalidInput("OPENCART is not a marketplace".into()))
        }
    };
    Ok(client)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> SyncConfig {
        let mut config = SyncConfig::from_toml(
            r#"
            [Opencart]
            Domain = "http://127.0.0.1:9"
            Username = "skeo"
            ApiKey = "key"

            [Lazada]
            Domain = "https://api.lazada.com.ph/rest"
            AppKey = "102505"
            AppSecret = "secret"

            [Shopee]
            ShopID = 220006
            PartnerID = 840001
            PartnerKey = "key"
            RedirectURL = "https://skeo.example.com/shopee"
            "#,
        )
        .unwrap();
        config.common.store = dir.path().join("skeo_sync.db");
        config
    }

    #[tokio::test]
    async fn test_reset_then_check_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);

        let before = do_check_config(&config).await.unwrap();
        assert_eq!(before.credentials.len(), 2);
        assert!(!before.is_ready());

        let record = do_lazada_reset_access_token(&config, TokenReset::new(" 50000601a2b3c4d5 "))
            .await
            .unwrap();
        assert_eq!(record.access_token, "50000601a2b3c4d5");

        let after = do_check_config(&config).await.unwrap();
        let lazada = after
            .credentials
            .iter()
            .find(|c| c.platform == Platform::Lazada)
            .unwrap();
        assert!(lazada.authorized);
        assert!(!lazada.expired);
        assert!(lazada.remaining_secs.unwrap() > 6 * 24 * 3600);
        assert_ne!(lazada.access_token.as_deref(), Some("50000601a2b3c4d5"));
        assert_eq!(after.sections, vec!["Common", "Opencart", "Lazada", "Shopee", "Sync"]);
    }

    #[tokio::test]
    async fn test_reset_requires_lazada_section() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.lazada = None;

        let err = do_lazada_reset_access_token(&config, TokenReset::new("tok"))
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_shopee_authorization_url_uses_configured_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);

        let url = do_generate_shopee_shop_authorization_url(&config, None).unwrap();
        assert_eq!(url.path(), "/api/v2/shop/auth_partner");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("partner_id".into(), "840001".into())));
        assert!(pairs.contains(&("redirect".into(), "https://skeo.example.com/shopee".into())));
        assert!(pairs.iter().any(|(k, v)| k == "sign" && v.len() == 64));
        assert!(!dir.path().join("skeo_sync.db").exists());
    }

    #[tokio::test]
    async fn test_sync_requires_storefront_section() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.opencart = None;

        let err = do_sync_procedure(&config, true, CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
