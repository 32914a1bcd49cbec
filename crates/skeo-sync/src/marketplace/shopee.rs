//! # Shopee Open Platform (v2) Client
//!
//! ## Request Signing
//! ```text
//! shop call:   base = partner_id + path + timestamp + access_token + shop_id
//! public call: base = partner_id + path + timestamp
//! sign = hex( HMAC-SHA256(partner_key, base) )
//! ```
//! `partner_id`, `timestamp`, `sign` (and for shop calls `shop_id`,
//! `access_token`) always travel in the query string.
//!
//! ## Listing
//! ```text
//! get_item_list (offset, NORMAL) ──► item ids ──► get_item_base_info
//!                                                    │
//!                         has_model? ── yes ──► get_model_list ──► one record per model
//!                                    └─ no ───► one record per item
//! ```
//!
//! A non-empty `error` field marks a failed call regardless of HTTP status.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use skeo_core::{ItemRef, Platform, ProductRecord, UpdateResult};
use tracing::debug;
use url::Url;

use super::{
    check_confirmed, hmac_sha256, lenient_i64, lenient_string, status_error, truncate,
    AuthSession, ClientOptions, MarketplaceClient, PageCursor, ProductPage,
};
use crate::config::ShopeeSection;
use crate::error::{SyncError, SyncResult};
use crate::oauth2::{TokenEndpoint, TokenGrant};

const PLATFORM: Platform = Platform::Shopee;

const PATH_ITEM_LIST: &str = "/api/v2/product/get_item_list";
const PATH_ITEM_BASE_INFO: &str = "/api/v2/product/get_item_base_info";
const PATH_MODEL_LIST: &str = "/api/v2/product/get_model_list";
const PATH_UPDATE_STOCK: &str = "/api/v2/product/update_stock";
const PATH_TOKEN_REFRESH: &str = "/api/v2/auth/access_token/get";
const PATH_AUTH_PARTNER: &str = "/api/v2/shop/auth_partner";

/// Items per `get_item_list` page (also the `get_item_base_info` batch cap).
pub const PAGE_SIZE: u64 = 50;

const AUTH_ERRORS: &[&str] = &["error_auth", "invalid_access_token", "invalid_acceess_token"];
const THROTTLE_ERRORS: &[&str] = &["error_too_many_request", "error_rate_limit"];

// =============================================================================
// Signing
// =============================================================================

/// Signature for a shop-scoped call.
pub fn sign_shop(
    partner_key: &str,
    partner_id: i64,
    path: &str,
    timestamp: i64,
    access_token: &str,
    shop_id: i64,
) -> SyncResult<String> {
    let base = format!("{partner_id}{path}{timestamp}{access_token}{shop_id}");
    Ok(hex::encode(hmac_sha256(partner_key, &base)?))
}

/// Signature for a public (auth) call.
pub fn sign_public(partner_key: &str, partner_id: i64, path: &str, timestamp: i64) -> SyncResult<String> {
    let base = format!("{partner_id}{path}{timestamp}");
    Ok(hex::encode(hmac_sha256(partner_key, &base)?))
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    response: Option<serde_json::Value>,
}

enum Reply {
    Data(Option<serde_json::Value>),
    Business { error: String, message: String },
}

impl Reply {
    /// `subject` names the SKU or item in a `NotFound`.
    fn into_data<T: DeserializeOwned + Default>(self, subject: &str) -> SyncResult<T> {
        match self {
            Reply::Data(Some(value)) => Ok(serde_json::from_value(value)?),
            Reply::Data(None) => Ok(T::default()),
            Reply::Business { error, .. } if error.ends_with("_not_found") => {
                Err(SyncError::NotFound {
                    platform: PLATFORM,
                    sku: subject.to_string(),
                })
            }
            Reply::Business { error, message } => Err(SyncError::Api {
                platform: PLATFORM,
                status: 200,
                message: format!("{error}: {message}"),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ItemListResponse {
    #[serde(default)]
    item: Vec<ItemId>,
    #[serde(default)]
    has_next_page: bool,
    #[serde(default, deserialize_with = "lenient_i64")]
    next_offset: i64,
}

#[derive(Debug, Deserialize)]
struct ItemId {
    #[serde(deserialize_with = "lenient_i64")]
    item_id: i64,
}

#[derive(Debug, Default, Deserialize)]
struct BaseInfoResponse {
    #[serde(default)]
    item_list: Vec<BaseInfo>,
}

#[derive(Debug, Deserialize)]
struct BaseInfo {
    #[serde(deserialize_with = "lenient_i64")]
    item_id: i64,
    #[serde(default)]
    item_sku: String,
    #[serde(default)]
    has_model: bool,
    #[serde(default)]
    stock_info_v2: Option<StockInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    model: Vec<Model>,
}

#[derive(Debug, Deserialize)]
struct Model {
    #[serde(deserialize_with = "lenient_i64")]
    model_id: i64,
    #[serde(default)]
    model_sku: String,
    #[serde(default)]
    stock_info_v2: Option<StockInfo>,
}

#[derive(Debug, Deserialize)]
struct StockInfo {
    #[serde(default)]
    summary_info: Option<StockSummary>,
}

#[derive(Debug, Deserialize)]
struct StockSummary {
    #[serde(default, deserialize_with = "lenient_i64")]
    total_available_stock: i64,
}

fn available(stock: &Option<StockInfo>) -> i64 {
    stock
        .as_ref()
        .and_then(|s| s.summary_info.as_ref())
        .map(|s| s.total_available_stock)
        .unwrap_or(0)
}

#[derive(Debug, Default, Deserialize)]
struct UpdateStockResponse {
    #[serde(default)]
    failure_list: Vec<StockFailure>,
}

#[derive(Debug, Deserialize)]
struct StockFailure {
    #[serde(default, deserialize_with = "lenient_string")]
    model_id: String,
    #[serde(default)]
    failed_reason: String,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    expire_in: i64,
}

// =============================================================================
// Client
// =============================================================================

/// Shopee shop-scoped product client.
pub struct ShopeeClient {
    http: reqwest::Client,
    domain: String,
    partner_id: i64,
    partner_key: String,
    shop_id: i64,
    session: AuthSession,
    options: ClientOptions,
}

impl ShopeeClient {
    pub fn new(
        http: reqwest::Client,
        config: &ShopeeSection,
        session: AuthSession,
        options: ClientOptions,
    ) -> Self {
        ShopeeClient {
            http,
            domain: config.domain.trim_end_matches('/').to_string(),
            partner_id: config.partner_id,
            partner_key: config.partner_key.clone(),
            shop_id: config.shop_id,
            session,
            options,
        }
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: Vec<(&'static str, String)>,
        body: Option<serde_json::Value>,
        access_token: String,
    ) -> SyncResult<Reply> {
        let timestamp = unix_now();
        let signature = sign_shop(
            &self.partner_key,
            self.partner_id,
            path,
            timestamp,
            &access_token,
            self.shop_id,
        )?;

        let mut url = Url::parse(&format!("{}{}", self.domain, path))?;
        url.query_pairs_mut()
            .append_pair("partner_id", &self.partner_id.to_string())
            .append_pair("timestamp", &timestamp.to_string())
            .append_pair("access_token", &access_token)
            .append_pair("shop_id", &self.shop_id.to_string())
            .append_pair("sign", &signature)
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));

        debug!(path, method = %method, "Shopee request");

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        // Shopee reports most failures in the body; only fall back to the
        // status when the body is not an envelope.
        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(status_error(PLATFORM, status, &headers, &text))
            }
            Err(e) => return Err(e.into()),
        };

        if envelope.error.is_empty() {
            if !status.is_success() {
                return Err(status_error(PLATFORM, status, &headers, &text));
            }
            return Ok(Reply::Data(envelope.response));
        }

        let error = envelope.error;
        if AUTH_ERRORS.contains(&error.as_str()) {
            return Err(SyncError::AuthExpired { platform: PLATFORM });
        }
        if THROTTLE_ERRORS.contains(&error.as_str()) || status.as_u16() == 429 {
            return Err(SyncError::RateLimited {
                platform: PLATFORM,
                retry_after: super::retry_after(&headers),
            });
        }
        if status.is_server_error() {
            return Err(SyncError::Api {
                platform: PLATFORM,
                status: status.as_u16(),
                message: truncate(&format!("{error}: {}", envelope.message), 200),
            });
        }

        Ok(Reply::Business {
            error,
            message: envelope.message,
        })
    }

    async fn get<T: DeserializeOwned + Default + Send>(
        &self,
        path: &'static str,
        query: Vec<(&'static str, String)>,
        subject: &str,
    ) -> SyncResult<T> {
        self.session
            .call(move |token| {
                let query = query.clone();
                async move {
                    self.execute(Method::GET, path, query, None, token)
                        .await?
                        .into_data::<T>(subject)
                }
            })
            .await
    }

    /// Expands base info into records, one per model for variation items.
    async fn records_for(&self, items: Vec<BaseInfo>) -> SyncResult<Vec<ProductRecord>> {
        let mut records = Vec::with_capacity(items.len());

        for item in items {
            let item_id = item.item_id.to_string();
            if !item.has_model {
                records.push(ProductRecord::new(
                    PLATFORM,
                    item.item_sku.clone(),
                    item_id,
                    available(&item.stock_info_v2),
                ));
                continue;
            }

            let models: ModelListResponse = self
                .get(PATH_MODEL_LIST, vec![("item_id", item_id.clone())], &item_id)
                .await?;
            debug!(item_id = %item_id, models = models.model.len(), "Shopee variations");

            for model in models.model {
                records.push(
                    ProductRecord::new(
                        PLATFORM,
                        model.model_sku,
                        item_id.clone(),
                        available(&model.stock_info_v2),
                    )
                    .with_variant(model.model_id.to_string()),
                );
            }
        }

        Ok(records)
    }

    async fn load_items(&self, item_ids: &[i64]) -> SyncResult<Vec<ProductRecord>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = item_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let info: BaseInfoResponse = self
            .get(PATH_ITEM_BASE_INFO, vec![("item_id_list", ids.clone())], &ids)
            .await?;
        self.records_for(info.item_list).await
    }
}

fn parse_id(item: &ItemRef, value: &str) -> SyncResult<i64> {
    value.parse().map_err(|_| {
        SyncError::InvalidInput(format!("Shopee id '{value}' for {} is not numeric", item.sku))
    })
}

#[async_trait]
impl MarketplaceClient for ShopeeClient {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    /// Shopee has no SKU search, so this walks the listing.
    async fn fetch_product(&self, sku: &str) -> SyncResult<ProductRecord> {
        let mut matches = Vec::new();
        let mut cursor = None;

        loop {
            let page = self.list_products(cursor).await?;
            matches.extend(page.records.into_iter().filter(|r| r.sku == sku));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        match matches.len() {
            0 => Err(SyncError::NotFound {
                platform: PLATFORM,
                sku: sku.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            count => Err(SyncError::MultipleResults {
                platform: PLATFORM,
                sku: sku.to_string(),
                count,
            }),
        }
    }

    async fn update_stock(&self, item: &ItemRef, quantity: i64) -> SyncResult<UpdateResult> {
        let item_id = parse_id(item, &item.item_id)?;
        let model_id = match item.variant_id.as_deref() {
            Some(variant) => parse_id(item, variant)?,
            None => 0,
        };
        let body = json!({
            "item_id": item_id,
            "stock_list": [{
                "model_id": model_id,
                "seller_stock": [{ "stock": quantity }],
            }],
        });

        let reply = self
            .session
            .call(move |token| {
                let body = body.clone();
                self.execute(Method::POST, PATH_UPDATE_STOCK, Vec::new(), Some(body), token)
            })
            .await?;

        let response: UpdateStockResponse = match reply {
            Reply::Business { error, .. } if error.ends_with("_not_found") => {
                return Err(SyncError::NotFound {
                    platform: PLATFORM,
                    sku: item.sku.clone(),
                })
            }
            Reply::Business { error, message } => return Ok(UpdateResult::rejected(error, message)),
            data => data.into_data(&item.sku)?,
        };

        if let Some(failure) = response.failure_list.first() {
            return Ok(UpdateResult::rejected(
                "failure_list",
                format!("model {}: {}", failure.model_id, failure.failed_reason),
            ));
        }

        if self.options.with_confirm {
            let record = self
                .load_items(&[item_id])
                .await?
                .into_iter()
                .find(|r| r.variant_id == item.variant_id)
                .ok_or_else(|| SyncError::NotFound {
                    platform: PLATFORM,
                    sku: item.sku.clone(),
                })?;
            check_confirmed(PLATFORM, item, quantity, &record)?;
        }

        Ok(UpdateResult::success())
    }

    async fn list_products(&self, cursor: Option<PageCursor>) -> SyncResult<ProductPage> {
        let offset = cursor.map(|c| c.0).unwrap_or(0);
        let list: ItemListResponse = self
            .get(
                PATH_ITEM_LIST,
                vec![
                    ("offset", offset.to_string()),
                    ("page_size", PAGE_SIZE.to_string()),
                    ("item_status", "NORMAL".to_string()),
                ],
                "item list",
            )
            .await?;

        let ids: Vec<i64> = list.item.iter().map(|i| i.item_id).collect();
        let records = self.load_items(&ids).await?;

        let next = (list.has_next_page && !ids.is_empty() && list.next_offset > offset as i64)
            .then(|| PageCursor(list.next_offset as u64));

        debug!(offset, items = ids.len(), records = records.len(), "Shopee products page");

        Ok(ProductPage { records, next })
    }
}

// =============================================================================
// Token Endpoint
// =============================================================================

/// Shopee half of the OAuth2 handshake.
pub struct ShopeeTokenEndpoint {
    http: reqwest::Client,
    domain: String,
    partner_id: i64,
    partner_key: String,
    shop_id: i64,
    redirect_url: Option<String>,
}

impl ShopeeTokenEndpoint {
    pub fn new(http: reqwest::Client, config: &ShopeeSection) -> Self {
        ShopeeTokenEndpoint {
            http,
            domain: config.domain.trim_end_matches('/').to_string(),
            partner_id: config.partner_id,
            partner_key: config.partner_key.clone(),
            shop_id: config.shop_id,
            redirect_url: config.redirect_url.clone(),
        }
    }

    fn public_url(&self, path: &str, timestamp: i64) -> SyncResult<Url> {
        let signature = sign_public(&self.partner_key, self.partner_id, path, timestamp)?;
        let mut url = Url::parse(&format!("{}{}", self.domain, path))?;
        url.query_pairs_mut()
            .append_pair("partner_id", &self.partner_id.to_string())
            .append_pair("timestamp", &timestamp.to_string())
            .append_pair("sign", &signature);
        Ok(url)
    }
}

#[async_trait]
impl TokenEndpoint for ShopeeTokenEndpoint {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn authorization_url(&self, redirect: Option<&str>) -> SyncResult<Url> {
        let redirect = redirect
            .or(self.redirect_url.as_deref())
            .ok_or_else(|| SyncError::InvalidInput("Shopee authorization needs a redirect URL".into()))?;

        let mut url = self.public_url(PATH_AUTH_PARTNER, unix_now())?;
        url.query_pairs_mut().append_pair("redirect", redirect);
        Ok(url)
    }

    async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenGrant> {
        let url = self.public_url(PATH_TOKEN_REFRESH, unix_now())?;
        let body = json!({
            "refresh_token": refresh_token,
            "partner_id": self.partner_id,
            "shop_id": self.shop_id,
        });

        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let reply: TokenReply = serde_json::from_str(&text).map_err(|e| SyncError::AuthRefreshFailed {
            platform: PLATFORM,
            reason: format!("HTTP {}: malformed token reply: {e}", status.as_u16()),
        })?;

        if !status.is_success() || !reply.error.is_empty() || reply.access_token.is_empty() {
            return Err(SyncError::AuthRefreshFailed {
                platform: PLATFORM,
                reason: format!("HTTP {}: {} {}", status.as_u16(), reply.error, reply.message)
                    .trim()
                    .to_string(),
            });
        }

        Ok(TokenGrant {
            access_token: reply.access_token,
            refresh_token: reply.refresh_token.filter(|t| !t.is_empty()),
            expires_in: reply.expire_in,
            scope: None,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn section() -> ShopeeSection {
        ShopeeSection {
            shop_id: 220006,
            partner_id: 840001,
            partner_key: "key".into(),
            domain: "https://partner.shopeemobile.com/".into(),
            redirect_url: None,
        }
    }

    #[test]
    fn test_signatures_match_reference_vectors() {
        assert_eq!(
            sign_shop("key", 840001, PATH_ITEM_LIST, 1_700_000_000, "tok", 220006).unwrap(),
            "73be57b8f2c68d6901afed678764efde3dd91f9f69339130527d11111547ffec"
        );
        assert_eq!(
            sign_public("key", 840001, PATH_AUTH_PARTNER, 1_700_000_000).unwrap(),
            "5057140dedae66e16d0888347f794b68871c2c8533f42e7f89062a8e82b858ed"
        );
    }

    #[test]
    fn test_authorization_url_carries_signature_and_redirect() {
        let endpoint = ShopeeTokenEndpoint::new(reqwest::Client::new(), &section());
        let url = endpoint
            .authorization_url(Some("https://skeo.example.com/shopee"))
            .unwrap();

        assert_eq!(url.path(), PATH_AUTH_PARTNER);
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["partner_id"], "840001");
        assert_eq!(pairs["redirect"], "https://skeo.example.com/shopee");
        assert_eq!(pairs["sign"].len(), 64);

        assert!(endpoint.authorization_url(None).is_err());
    }

    #[test]
    fn test_base_info_stock() {
        let info: BaseInfoResponse = serde_json::from_str(
            r#"{"item_list": [
                {"item_id": 1295544772, "item_sku": "CPLA175RRD", "has_model": false,
                 "stock_info_v2": {"summary_info": {"total_available_stock": 4}}},
                {"item_id": "77", "item_sku": "", "has_model": true}
            ]}"#,
        )
        .unwrap();

        assert_eq!(info.item_list.len(), 2);
        assert_eq!(available(&info.item_list[0].stock_info_v2), 4);
        assert_eq!(info.item_list[1].item_id, 77);
        assert_eq!(available(&info.item_list[1].stock_info_v2), 0);
    }

    #[test]
    fn test_not_found_business_error() {
        let reply = Reply::Business {
            error: "error_item_not_found".into(),
            message: "item not found".into(),
        };
        let err = reply.into_data::<ItemListResponse>("2033").unwrap_err();
        assert!(matches!(err, SyncError::NotFound { ref sku, .. } if sku == "2033"));
    }

    #[test]
    fn test_non_numeric_ids_rejected() {
        let item = ItemRef {
            sku: "2033".into(),
            item_id: "abc".into(),
            variant_id: None,
        };
        assert!(matches!(parse_id(&item, &item.item_id), Err(SyncError::InvalidInput(_))));
    }
}
