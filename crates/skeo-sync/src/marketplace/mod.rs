//! # Marketplace Clients
//!
//! One capability set, one implementation per marketplace.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     dyn MarketplaceClient                               │
//! │                                                                         │
//! │   fetch_product(sku)            ──► ProductRecord | NotFound           │
//! │   update_stock(item, quantity)  ──► UpdateResult  (absolute, idempotent)│
//! │   list_products(cursor)         ──► ProductPage { records, next }      │
//! │                                                                         │
//! │   ┌───────────────────────┐        ┌───────────────────────┐           │
//! │   │ LazadaClient          │        │ ShopeeClient          │           │
//! │   │ HMAC upper-hex, sorted│        │ HMAC lower-hex, base  │           │
//! │   │ query params          │        │ string, shop scoped   │           │
//! │   └───────────┬───────────┘        └───────────┬───────────┘           │
//! │               └──────────────┬─────────────────┘                       │
//! │                        AuthSession                                     │
//! │            bearer token + refresh-and-retry-once                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod lazada;
pub mod shopee;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use sha2::Sha256;
use skeo_core::{ItemRef, Platform, ProductRecord, UpdateResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::oauth2::OAuth2Service;

pub use lazada::{LazadaClient, LazadaTokenEndpoint};
pub use shopee::{ShopeeClient, ShopeeTokenEndpoint};

// =============================================================================
// Capability Interface
// =============================================================================

/// Opaque position in a marketplace listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PageCursor(pub u64);

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ProductPage {
    pub records: Vec<ProductRecord>,
    /// `None` once the listing is exhausted.
    pub next: Option<PageCursor>,
}

/// Per-client policy toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Re-read the listing after each write.
    pub with_confirm: bool,
    /// Refresh the token and retry once on `AuthExpired`.
    pub with_refresh: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            with_confirm: true,
            with_refresh: true,
        }
    }
}

#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// Looks up a single listing by seller SKU.
    async fn fetch_product(&self, sku: &str) -> SyncResult<ProductRecord>;

    /// Sets the sellable stock of `item` to `quantity`.
    ///
    /// Business rejections come back as `Ok` with a non-empty error code;
    /// `Err` is reserved for transport, auth and confirmation failures.
    async fn update_stock(&self, item: &ItemRef, quantity: i64) -> SyncResult<UpdateResult>;

    /// Returns one page of the listing, starting at `cursor` (or the
    /// beginning).
    async fn list_products(&self, cursor: Option<PageCursor>) -> SyncResult<ProductPage>;
}

// =============================================================================
// Auth Session
// =============================================================================

/// Bearer token shared by all calls of one client.
///
/// With `with_refresh` on, an `AuthExpired` reply refreshes through the
/// OAuth2 service and repeats the operation exactly once.
pub struct AuthSession {
    platform: Platform,
    oauth: Option<Arc<OAuth2Service>>,
    token: RwLock<String>,
    with_refresh: bool,
}

impl AuthSession {
    /// Loads the stored token for `platform`.
    ///
    /// Fails with `AuthNotConfigured` when the platform was never authorized.
    pub async fn from_store(
        oauth: Arc<OAuth2Service>,
        platform: Platform,
        with_refresh: bool,
    ) -> SyncResult<Self> {
        let record = oauth.get_tokens(platform).await?;
        if record.is_expired_at(chrono::Utc::now()) {
            warn!(
                platform = %platform,
                expired_at = %record.expires_at,
                "Stored access token has expired"
            );
        }

        Ok(AuthSession {
            platform,
            oauth: Some(oauth),
            token: RwLock::new(record.access_token),
            with_refresh,
        })
    }

    /// A session with a fixed token and no refresh capability.
    pub fn fixed(platform: Platform, access_token: impl Into<String>) -> Self {
        AuthSession {
            platform,
            oauth: None,
            token: RwLock::new(access_token.into()),
            with_refresh: false,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub async fn access_token(&self) -> String {
        self.token.read().await.clone()
    }

    /// Runs `op` with the current token.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> SyncResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let token = self.access_token().await;

        match op(token.clone()).await {
            Err(SyncError::AuthExpired { platform }) => {
                let oauth = match (&self.oauth, self.with_refresh) {
                    (Some(oauth), true) => oauth,
                    _ => return Err(SyncError::AuthExpired { platform }),
                };

                info!(platform = %self.platform, "Access token rejected, refreshing");
                let record = oauth.refresh_after_expiry(self.platform, &token).await?;
                *self.token.write().await = record.access_token.clone();

                op(record.access_token).await
            }
            other => other,
        }
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 of `message` under `key`.
pub(crate) fn hmac_sha256(key: &str, message: &str) -> SyncResult<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| SyncError::Internal(format!("HMAC key rejected: {e}")))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Maps a non-success HTTP status to the error taxonomy.
pub(crate) fn status_error(
    platform: Platform,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> SyncError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited {
            platform,
            retry_after: retry_after(headers),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AuthExpired { platform },
        _ => SyncError::Api {
            platform,
            status: status.as_u16(),
            message: truncate(body, 200),
        },
    }
}

/// `Retry-After` in seconds, if the platform sent one.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Compares the read-back stock of a confirmed write.
pub(crate) fn check_confirmed(
    platform: Platform,
    item: &ItemRef,
    expected: i64,
    record: &ProductRecord,
) -> SyncResult<()> {
    if record.stock_quantity != expected {
        return Err(SyncError::UpdateUnconfirmed {
            platform,
            sku: item.sku.clone(),
            expected,
            actual: record.stock_quantity,
        });
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Accepts `5`, `5.0` and `"5"`; marketplaces are inconsistent about it.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Lenient::deserialize(deserializer)? {
        Lenient::Int(n) => Ok(n),
        Lenient::Float(f) => Ok(f as i64),
        Lenient::Text(s) if s.trim().is_empty() => Ok(0),
        Lenient::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub(crate) fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Lenient>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Lenient::Int(n)) => Ok(Some(n)),
        Some(Lenient::Float(f)) => Ok(Some(f as i64)),
        Some(Lenient::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Lenient::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Accepts identifiers sent either as numbers or strings.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Lenient::deserialize(deserializer)? {
        Lenient::Int(n) => n.to_string(),
        Lenient::Float(f) => f.to_string(),
        Lenient::Text(s) => s,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth2::tests::{seed, temp_db, FakeEndpoint};
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Deserialize)]
    struct Row {
        #[serde(deserialize_with = "lenient_i64")]
        quantity: i64,
        #[serde(deserialize_with = "lenient_string")]
        id: String,
        #[serde(default, deserialize_with = "lenient_opt_i64")]
        available: Option<i64>,
    }

    #[test]
    fn test_lenient_numbers() {
        let row: Row = serde_json::from_str(r#"{"quantity":"12","id":1295544772}"#).unwrap();
        assert_eq!(row.quantity, 12);
        assert_eq!(row.id, "1295544772");
        assert_eq!(row.available, None);

        let row: Row =
            serde_json::from_str(r#"{"quantity":3.0,"id":"A-1","available":"7"}"#).unwrap();
        assert_eq!(row.quantity, 3);
        assert_eq!(row.available, Some(7));

        assert!(serde_json::from_str::<Row>(r#"{"quantity":"many","id":"x"}"#).is_err());
    }

    #[test]
    fn test_status_mapping() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("4"));

        let err = status_error(Platform::Shopee, StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(4)));

        let err = status_error(Platform::Lazada, StatusCode::UNAUTHORIZED, &HeaderMap::new(), "");
        assert!(matches!(err, SyncError::AuthExpired { .. }));

        let err = status_error(
            Platform::Lazada,
            StatusCode::BAD_GATEWAY,
            &HeaderMap::new(),
            &"x".repeat(500),
        );
        assert!(err.is_retryable());
        assert!(err.to_string().len() < 300);
    }

    #[tokio::test]
    async fn test_session_refreshes_once_and_retries_with_new_token() {
        let (_dir, db) = temp_db().await;
        seed(&db, Platform::Lazada, "expired", "r0").await;
        let endpoint = FakeEndpoint::new(Platform::Lazada);
        let oauth = Arc::new(OAuth2Service::new(db).with_endpoint(endpoint.clone()));
        let session = AuthSession::from_store(oauth, Platform::Lazada, true)
            .await
            .unwrap();

        let seen = Mutex::new(Vec::new());
        let seen_ref = &seen;
        let result = session
            .call(move |token| async move {
                seen_ref.lock().unwrap().push(token.clone());
                if token == "expired" {
                    Err(SyncError::AuthExpired {
                        platform: Platform::Lazada,
                    })
                } else {
                    Ok(token)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "access-1");
        assert_eq!(*seen.lock().unwrap(), vec!["expired", "access-1"]);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.access_token().await, "access-1");
    }

    #[tokio::test]
    async fn test_session_surfaces_second_expiry() {
        let (_dir, db) = temp_db().await;
        seed(&db, Platform::Shopee, "expired", "r0").await;
        let endpoint = FakeEndpoint::new(Platform::Shopee);
        let oauth = Arc::new(OAuth2Service::new(db).with_endpoint(endpoint.clone()));
        let session = AuthSession::from_store(oauth, Platform::Shopee, true)
            .await
            .unwrap();

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: SyncResult<()> = session
            .call(move |_token| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::AuthExpired {
                    platform: Platform::Shopee,
                })
            })
            .await;

        assert!(matches!(result, Err(SyncError::AuthExpired { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_without_refresh_does_not_retry() {
        let session = AuthSession::fixed(Platform::Lazada, "static");
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: SyncResult<()> = session
            .call(move |_token| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::AuthExpired {
                    platform: Platform::Lazada,
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_requires_stored_token() {
        let (_dir, db) = temp_db().await;
        let oauth = Arc::new(OAuth2Service::new(db));
        let err = AuthSession::from_store(oauth, Platform::Lazada, true)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::AuthNotConfigured { .. }));
    }
}
