//! # Authoritative Source
//!
//! The OpenCart storefront is the system of record for stock. It is read
//! through the storefront API:
//!
//! ```text
//! POST index.php?route=api/login          username + key  ──► api_token
//! GET  index.php?route=api/skeo/products  api_token, start, limit
//!                                         ──► { products: [{product_id, model, quantity}], total }
//! ```
//!
//! `model` is the SKU shared with the marketplaces. The session token is
//! obtained once and reused for every page.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use skeo_core::{Platform, ProductRecord};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::{form_urlencoded, Url};

use crate::config::OpencartSection;
use crate::error::{SyncError, SyncResult};
use crate::marketplace::{lenient_i64, lenient_string, status_error, PageCursor, ProductPage};

const PLATFORM: Platform = Platform::Opencart;

/// Products per storefront page.
pub const PAGE_SIZE: u64 = 100;

/// Read access to the authoritative stock levels.
#[async_trait]
pub trait AuthoritativeSource: Send + Sync {
    async fn list_products(&self, cursor: Option<PageCursor>) -> SyncResult<ProductPage>;
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(default)]
    api_token: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProductsReply {
    #[serde(default)]
    products: Vec<OpencartProduct>,
    #[serde(default, deserialize_with = "lenient_i64")]
    total: i64,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpencartProduct {
    #[serde(deserialize_with = "lenient_string")]
    product_id: String,
    #[serde(default)]
    model: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    quantity: i64,
}

/// OpenCart storefront API client.
pub struct OpencartClient {
    http: reqwest::Client,
    domain: String,
    username: String,
    api_key: String,
    api_token: Mutex<Option<String>>,
}

impl OpencartClient {
    pub fn new(http: reqwest::Client, config: &OpencartSection) -> Self {
        OpencartClient {
            http,
            domain: config.domain.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_key: config.api_key.clone(),
            api_token: Mutex::new(None),
        }
    }

    fn route_url(&self, route: &str) -> SyncResult<Url> {
        let mut url = Url::parse(&format!("{}/index.php", self.domain))?;
        url.query_pairs_mut().append_pair("route", route);
        Ok(url)
    }

    /// Returns the cached session token, logging in on first use.
    async fn api_token(&self) -> SyncResult<String> {
        let mut cached = self.api_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("username", &self.username)
            .append_pair("key", &self.api_key)
            .finish();

        let response = self
            .http
            .post(self.route_url("api/login")?)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(PLATFORM, status, &headers, &text));
        }

        let reply: LoginReply = serde_json::from_str(&text)?;
        match (reply.api_token, reply.error) {
            (Some(token), None) if !token.is_empty() => {
                info!(username = %self.username, "Logged in to storefront API");
                *cached = Some(token.clone());
                Ok(token)
            }
            (_, error) => Err(SyncError::Api {
                platform: PLATFORM,
                status: status.as_u16(),
                message: format!(
                    "login rejected: {}",
                    error.map(|e| e.to_string()).unwrap_or_else(|| "no api_token".into())
                ),
            }),
        }
    }
}

#[async_trait]
impl AuthoritativeSource for OpencartClient {
    async fn list_products(&self, cursor: Option<PageCursor>) -> SyncResult<ProductPage> {
        let start = cursor.map(|c| c.0).unwrap_or(0);
        let token = self.api_token().await?;

        let mut url = self.route_url("api/skeo/products")?;
        url.query_pairs_mut()
            .append_pair("api_token", &token)
            .append_pair("start", &start.to_string())
            .append_pair("limit", &PAGE_SIZE.to_string());

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(PLATFORM, status, &headers, &text));
        }

        let reply: ProductsReply = serde_json::from_str(&text)?;
        if let Some(error) = reply.error {
            return Err(SyncError::Api {
                platform: PLATFORM,
                status: status.as_u16(),
                message: error.to_string(),
            });
        }

        let fetched = reply.products.len() as u64;
        let next_start = start + fetched;
        let next = (fetched > 0 && (next_start as i64) < reply.total).then_some(PageCursor(next_start));

        debug!(start, fetched, total = reply.total, "Storefront products page");

        let records = reply
            .products
            .into_iter()
            .map(|p| ProductRecord::new(PLATFORM, p.model.trim(), p.product_id, p.quantity))
            .collect();

        Ok(ProductPage { records, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_products_reply_accepts_string_numbers() {
        let reply: ProductsReply = serde_json::from_str(
            r#"{"products": [{"product_id": "42", "model": "2033 ", "quantity": "5"}], "total": "1"}"#,
        )
        .unwrap();
        assert_eq!(reply.total, 1);
        assert_eq!(reply.products[0].product_id, "42");
        assert_eq!(reply.products[0].quantity, 5);
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_route_url() {
        let client = OpencartClient::new(
            reqwest::Client::new(),
            &OpencartSection {
                domain: "https://shop.example.com/".into(),
                username: "skeo".into(),
                api_key: "k".into(),
            },
        );
        let url = client.route_url("api/login").unwrap();
        assert_eq!(url.as_str(), "https://shop.example.com/index.php?route=api%2Flogin");
    }
}
