//! # Lazada Open Platform Client
//!
//! ## Request Signing
//! ```text
//! params  = api params + { app_key, sign_method=sha256, timestamp(ms), access_token }
//! base    = api_path + concat(key + value for key in sorted(params))
//! sign    = HEX_UPPER( HMAC-SHA256(app_secret, base) )
//! ```
//!
//! ## Calls Used
//! | Operation       | API                              | Method |
//! |-----------------|----------------------------------|--------|
//! | list / fetch    | `/products/get`                  | GET    |
//! | update stock    | `/product/stock/sellable/update` | POST   |
//! | refresh token   | `/auth/token/refresh` (auth host)| POST   |
//!
//! Every reply carries a string `code`; `"0"` means success.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use skeo_core::{ItemRef, Platform, ProductRecord, UpdateResult};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

use super::{
    check_confirmed, hmac_sha256, lenient_i64, lenient_opt_i64, lenient_string, status_error,
    AuthSession, ClientOptions, MarketplaceClient, PageCursor, ProductPage,
};
use crate::config::LazadaSection;
use crate::error::{SyncError, SyncResult};
use crate::oauth2::{TokenEndpoint, TokenGrant};

const PLATFORM: Platform = Platform::Lazada;

const API_PRODUCTS_GET: &str = "/products/get";
const API_SELLABLE_UPDATE: &str = "/product/stock/sellable/update";
const API_TOKEN_REFRESH: &str = "/auth/token/refresh";

/// Products per `/products/get` page.
pub const PAGE_SIZE: u64 = 50;

const AUTH_ERROR_CODES: &[&str] = &[
    "IllegalAccessToken",
    "MissingAccessToken",
    "InvalidAccessToken",
    "AccessTokenExpired",
];
const THROTTLE_ERROR_CODES: &[&str] = &["ApiCallLimit", "AppCallLimit", "SellerCallLimit"];

// =============================================================================
// Signing
// =============================================================================

/// Signature over `api` and the sorted parameters.
pub fn sign(secret: &str, api: &str, params: &BTreeMap<String, String>) -> SyncResult<String> {
    let mut base = String::from(api);
    for (key, value) in params {
        base.push_str(key);
        base.push_str(value);
    }
    Ok(hex::encode_upper(hmac_sha256(secret, &base)?))
}

/// App credentials shared by the product client and the token endpoint.
#[derive(Clone)]
struct Signer {
    app_key: String,
    app_secret: String,
}

impl Signer {
    fn signed(
        &self,
        api: &str,
        mut params: BTreeMap<String, String>,
        access_token: Option<&str>,
    ) -> SyncResult<BTreeMap<String, String>> {
        params.insert("app_key".into(), self.app_key.clone());
        params.insert("sign_method".into(), "sha256".into());
        params.insert(
            "timestamp".into(),
            chrono::Utc::now().timestamp_millis().to_string(),
        );
        if let Some(token) = access_token {
            params.insert("access_token".into(), token.to_string());
        }
        let signature = sign(&self.app_secret, api, &params)?;
        params.insert("sign".into(), signature);
        Ok(params)
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default, deserialize_with = "lenient_string")]
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl Envelope {
    fn is_success(&self) -> bool {
        self.code.is_empty() || self.code == "0"
    }

    fn message(&self) -> String {
        self.message.clone().unwrap_or_default()
    }
}

/// Outcome of a call that reached Lazada.
enum Reply {
    Data(Option<serde_json::Value>),
    Business { code: String, message: String },
}

impl Reply {
    /// Reads treat business errors as failures.
    fn into_data<T: DeserializeOwned + Default>(self) -> SyncResult<T> {
        match self {
            Reply::Data(Some(value)) => Ok(serde_json::from_value(value)?),
            Reply::Data(None) => Ok(T::default()),
            Reply::Business { code, message } => Err(SyncError::Api {
                platform: PLATFORM,
                status: 200,
                message: format!("{code}: {message}"),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProductsData {
    #[serde(default, deserialize_with = "lenient_i64")]
    total_products: i64,
    #[serde(default)]
    products: Vec<LazadaProduct>,
}

#[derive(Debug, Deserialize)]
struct LazadaProduct {
    #[serde(deserialize_with = "lenient_string")]
    item_id: String,
    #[serde(default)]
    skus: Vec<LazadaSku>,
}

#[derive(Debug, Deserialize)]
struct LazadaSku {
    #[serde(rename = "SellerSku", default)]
    seller_sku: String,
    #[serde(rename = "SkuId", default, deserialize_with = "lenient_string")]
    sku_id: String,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    quantity: Option<i64>,
    #[serde(rename = "Available", default, deserialize_with = "lenient_opt_i64")]
    available: Option<i64>,
}

impl ProductsData {
    fn into_records(self) -> Vec<ProductRecord> {
        self.products
            .into_iter()
            .flat_map(|product| {
                let item_id = product.item_id;
                product.skus.into_iter().map(move |sku| {
                    let stock = sku.available.or(sku.quantity).unwrap_or(0);
                    let record = ProductRecord::new(PLATFORM, sku.seller_sku, item_id.clone(), stock);
                    if sku.sku_id.is_empty() {
                        record
                    } else {
                        record.with_variant(sku.sku_id)
                    }
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RefreshReply {
    #[serde(default, deserialize_with = "lenient_string")]
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    expires_in: i64,
}

// =============================================================================
// Client
// =============================================================================

/// Lazada seller API client.
pub struct LazadaClient {
    http: reqwest::Client,
    domain: String,
    signer: Signer,
    session: AuthSession,
    options: ClientOptions,
}

impl LazadaClient {
    pub fn new(
        http: reqwest::Client,
        config: &LazadaSection,
        session: AuthSession,
        options: ClientOptions,
    ) -> Self {
        LazadaClient {
            http,
            domain: config.domain.trim_end_matches('/').to_string(),
            signer: Signer {
                app_key: config.app_key.clone(),
                app_secret: config.app_secret.clone(),
            },
            session,
            options,
        }
    }

    async fn execute(
        &self,
        method: Method,
        api: &str,
        params: BTreeMap<String, String>,
        access_token: String,
    ) -> SyncResult<Reply> {
        let params = self.signer.signed(api, params, Some(&access_token))?;
        let mut url = Url::parse(&format!("{}{}", self.domain, api))?;

        debug!(api, method = %method, "Lazada request");

        let request = if method == Method::GET {
            url.query_pairs_mut().extend_pairs(params.iter());
            self.http.get(url)
        } else {
            let body = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter())
                .finish();
            self.http
                .request(method, url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body)
        };

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(status_error(PLATFORM, status, &headers, &body));
        }

        let envelope: Envelope = serde_json::from_str(&body)?;
        if envelope.is_success() {
            return Ok(Reply::Data(envelope.data));
        }

        let code = envelope.code.clone();
        if AUTH_ERROR_CODES.contains(&code.as_str()) {
            return Err(SyncError::AuthExpired { platform: PLATFORM });
        }
        if THROTTLE_ERROR_CODES.contains(&code.as_str()) {
            return Err(SyncError::RateLimited {
                platform: PLATFORM,
                retry_after: None,
            });
        }

        Ok(Reply::Business {
            code,
            message: envelope.message(),
        })
    }

    async fn get_products(&self, params: BTreeMap<String, String>) -> SyncResult<ProductsData> {
        self.session
            .call(move |token| {
                let params = params.clone();
                async move {
                    self.execute(Method::GET, API_PRODUCTS_GET, params, token)
                        .await?
                        .into_data::<ProductsData>()
                }
            })
            .await
    }

    /// Exact-SKU search; `variant_id` narrows to one listing when known.
    async fn find_listing(&self, sku: &str, variant_id: Option<&str>) -> SyncResult<ProductRecord> {
        let params = BTreeMap::from([
            ("filter".to_string(), "all".to_string()),
            ("search".to_string(), sku.to_string()),
            ("offset".to_string(), "0".to_string()),
            ("limit".to_string(), PAGE_SIZE.to_string()),
        ]);

        let mut matches: Vec<ProductRecord> = self
            .get_products(params)
            .await?
            .into_records()
            .into_iter()
            .filter(|r| r.sku == sku)
            .filter(|r| variant_id.map_or(true, |v| r.variant_id.as_deref() == Some(v)))
            .collect();

        if matches.is_empty() {
            return Err(SyncError::NotFound {
                platform: PLATFORM,
                sku: sku.to_string(),
            });
        }
        if matches.len() > 1 {
            warn!(sku, count = matches.len(), "Lazada has multiple listings for SKU, using the first");
        }
        Ok(matches.swap_remove(0))
    }
}

/// `/product/stock/sellable/update` payload for one SKU.
fn sellable_payload(item: &ItemRef, quantity: i64) -> String {
    let variant = item
        .variant_id
        .as_deref()
        .map(|v| format!("<SkuId>{}</SkuId>", xml_escape(v)))
        .unwrap_or_default();

    format!(
        "<Request><Product><Skus><Sku>\
         <ItemId>{}</ItemId>{}<SellerSku>{}</SellerSku>\
         <SellableQuantity>{}</SellableQuantity>\
         </Sku></Skus></Product></Request>",
        xml_escape(&item.item_id),
        variant,
        xml_escape(&item.sku),
        quantity
    )
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[async_trait]
impl MarketplaceClient for LazadaClient {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn fetch_product(&self, sku: &str) -> SyncResult<ProductRecord> {
        self.find_listing(sku, None).await
    }

    async fn update_stock(&self, item: &ItemRef, quantity: i64) -> SyncResult<UpdateResult> {
        let payload = sellable_payload(item, quantity);
        let params = BTreeMap::from([("payload".to_string(), payload)]);

        let reply = self
            .session
            .call(move |token| {
                let params = params.clone();
                self.execute(Method::POST, API_SELLABLE_UPDATE, params, token)
            })
            .await?;

        if let Reply::Business { code, message } = reply {
            return Ok(UpdateResult::rejected(code, message));
        }

        if self.options.with_confirm {
            let record = self.find_listing(&item.sku, item.variant_id.as_deref()).await?;
            check_confirmed(PLATFORM, item, quantity, &record)?;
        }

        Ok(UpdateResult::success())
    }

    async fn list_products(&self, cursor: Option<PageCursor>) -> SyncResult<ProductPage> {
        let offset = cursor.map(|c| c.0).unwrap_or(0);
        let params = BTreeMap::from([
            ("filter".to_string(), "all".to_string()),
            ("offset".to_string(), offset.to_string()),
            ("limit".to_string(), PAGE_SIZE.to_string()),
        ]);

        let data = self.get_products(params).await?;
        let fetched = data.products.len() as u64;
        let total = data.total_products.max(0) as u64;
        let next_offset = offset + fetched;

        let next = if fetched == 0 || next_offset >= total {
            None
        } else {
            Some(PageCursor(next_offset))
        };

        debug!(offset, fetched, total, "Lazada products page");

        Ok(ProductPage {
            records: data.into_records(),
            next,
        })
    }
}

// =============================================================================
// Token Endpoint
// =============================================================================

/// Lazada half of the OAuth2 handshake (`auth.lazada.com`).
pub struct LazadaTokenEndpoint {
    http: reqwest::Client,
    auth_domain: String,
    signer: Signer,
    redirect_url: Option<String>,
}

impl LazadaTokenEndpoint {
    pub fn new(http: reqwest::Client, config: &LazadaSection) -> Self {
        LazadaTokenEndpoint {
            http,
            auth_domain: config.auth_domain.trim_end_matches('/').to_string(),
            signer: Signer {
                app_key: config.app_key.clone(),
                app_secret: config.app_secret.clone(),
            },
            redirect_url: config.redirect_url.clone(),
        }
    }
}

#[async_trait]
impl TokenEndpoint for LazadaTokenEndpoint {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn authorization_url(&self, redirect: Option<&str>) -> SyncResult<Url> {
        let redirect = redirect
            .or(self.redirect_url.as_deref())
            .ok_or_else(|| SyncError::InvalidInput("Lazada consent needs a redirect URL".into()))?;

        let mut url = Url::parse(&format!("{}/oauth/authorize", self.auth_domain))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("force_auth", "true")
            .append_pair("redirect_uri", redirect)
            .append_pair("client_id", &self.signer.app_key);
        Ok(url)
    }

    async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenGrant> {
        let params = BTreeMap::from([("refresh_token".to_string(), refresh_token.to_string())]);
        let params = self.signer.signed(API_TOKEN_REFRESH, params, None)?;
        let url = Url::parse(&format!("{}/rest{}", self.auth_domain, API_TOKEN_REFRESH))?;
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SyncError::AuthRefreshFailed {
                platform: PLATFORM,
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let reply: RefreshReply = serde_json::from_str(&body).map_err(|e| {
            SyncError::AuthRefreshFailed {
                platform: PLATFORM,
                reason: format!("malformed token reply: {e}"),
            }
        })?;

        if !(reply.code.is_empty() || reply.code == "0") || reply.access_token.is_empty() {
            return Err(SyncError::AuthRefreshFailed {
                platform: PLATFORM,
                reason: format!(
                    "{}: {}",
                    reply.code,
                    reply.message.unwrap_or_else(|| "no access token returned".into())
                ),
            });
        }

        Ok(TokenGrant {
            access_token: reply.access_token,
            refresh_token: reply.refresh_token.filter(|t| !t.is_empty()),
            expires_in: reply.expires_in,
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

    fn section() -> LazadaSection {
        LazadaSection {
            domain: "https://api.lazada.com.ph/rest/".into(),
            app_key: "102505".into(),
            app_secret: "secret".into(),
            auth_domain: "https://auth.lazada.com".into(),
            redirect_url: Some("https://skeo.example.com/callback".into()),
        }
    }

    #[test]
    fn test_sign_matches_reference_vector() {
        let params: BTreeMap<String, String> = [
            ("app_key", "102505"),
            ("sign_method", "sha256"),
            ("timestamp", "1700000000000"),
            ("access_token", "tok"),
            ("search", "2033"),
            ("filter", "all"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(
            sign("secret", "/products/get", &params).unwrap(),
            "5BB014DE539F1B98C9FFCB2EDB7F96F9B19F5F27153A358E25BDF444010B8D20"
        );
    }

    #[test]
    fn test_products_data_flattens_skus() {
        let data: ProductsData = serde_json::from_str(
            r#"{
                "total_products": "2",
                "products": [
                    {"item_id": 1001, "skus": [
                        {"SellerSku": "2033", "SkuId": 5001, "quantity": 9, "Available": "3"},
                        {"SellerSku": "2034", "SkuId": "5002", "quantity": 4}
                    ]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(data.total_products, 2);
        let records = data.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sku, "2033");
        assert_eq!(records[0].item_id, "1001");
        assert_eq!(records[0].variant_id.as_deref(), Some("5001"));
        assert_eq!(records[0].stock_quantity, 3);
        assert_eq!(records[1].stock_quantity, 4);
    }

    #[test]
    fn test_sellable_payload_escapes_values() {
        let item = ItemRef {
            sku: "A&B<1>".into(),
            item_id: "1001".into(),
            variant_id: Some("5001".into()),
        };
        let payload = sellable_payload(&item, 7);
        assert!(payload.contains("<SellerSku>A&amp;B&lt;1&gt;</SellerSku>"));
        assert!(payload.contains("<SkuId>5001</SkuId>"));
        assert!(payload.contains("<SellableQuantity>7</SellableQuantity>"));
    }

    #[test]
    fn test_authorization_url() {
        let endpoint = LazadaTokenEndpoint::new(reqwest::Client::new(), &section());
        let url = endpoint.authorization_url(None).unwrap();

        assert_eq!(url.path(), "/oauth/authorize");
        let pairs: BTreeMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "102505");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["redirect_uri"], "https://skeo.example.com/callback");

        let mut no_redirect = section();
        no_redirect.redirect_url = None;
        let endpoint = LazadaTokenEndpoint::new(reqwest::Client::new(), &no_redirect);
        assert!(endpoint.authorization_url(None).is_err());
    }

    #[test]
    fn test_client_trims_domain() {
        let client = LazadaClient::new(
            reqwest::Client::new(),
            &section(),
            AuthSession::fixed(PLATFORM, "tok"),
            ClientOptions::default(),
        );
        assert_eq!(client.domain, "https://api.lazada.com.ph/rest");
        assert_eq!(client.platform(), Platform::Lazada);
    }
}
