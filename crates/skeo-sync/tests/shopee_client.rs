//! Integration tests for the Shopee v2 client using wiremock.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skeo_core::{CredentialRecord, ItemRef, Platform};
use skeo_db::{Database, DbConfig};
use skeo_sync::config::ShopeeSection;
use skeo_sync::marketplace::{ShopeeClient, ShopeeTokenEndpoint};
use skeo_sync::{AuthSession, ClientOptions, MarketplaceClient, OAuth2Service, SyncError};

// =============================================================================
// Test Helpers
// =============================================================================

fn section(server: &MockServer) -> ShopeeSection {
    ShopeeSection {
        shop_id: 220006,
        partner_id: 840001,
        partner_key: "key".into(),
        domain: server.uri(),
        redirect_url: None,
    }
}

fn client(server: &MockServer, with_confirm: bool) -> ShopeeClient {
    ShopeeClient::new(
        reqwest::Client::new(),
        &section(server),
        AuthSession::fixed(Platform::Shopee, "tok"),
        ClientOptions {
            with_confirm,
            with_refresh: false,
        },
    )
}

fn ok(response: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "error": "",
        "message": "",
        "request_id": "e3e3",
        "response": response
    }))
}

fn stock(available: i64) -> serde_json::Value {
    json!({ "summary_info": { "total_available_stock": available, "total_reserved_stock": 0 } })
}

/// One plain item (101, "A") and one item with two models (102, "B"/"C").
async fn mount_catalog(server: &MockServer, duplicate_a: bool) {
    Mock::given(method("GET"))
        .and(path("/api/v2/product/get_item_list"))
        .and(query_param("offset", "0"))
        .and(query_param("item_status", "NORMAL"))
        .and(query_param("shop_id", "220006"))
        .respond_with(ok(json!({
            "item": [{ "item_id": 101, "item_status": "NORMAL" }, { "item_id": 102, "item_status": "NORMAL" }],
            "total_count": 2,
            "has_next_page": false,
            "next_offset": 2
        })))
        .mount(server)
        .await;

    let second_sku = if duplicate_a { "A" } else { "" };
    Mock::given(method("GET"))
        .and(path("/api/v2/product/get_item_base_info"))
        .and(query_param("item_id_list", "101,102"))
        .respond_with(ok(json!({
            "item_list": [
                { "item_id": 101, "item_sku": "A", "has_model": false, "stock_info_v2": stock(4) },
                { "item_id": 102, "item_sku": second_sku, "has_model": true }
            ]
        })))
        .mount(server)
        .await;

    let first_model_sku = if duplicate_a { "A" } else { "B" };
    Mock::given(method("GET"))
        .and(path("/api/v2/product/get_model_list"))
        .and(query_param("item_id", "102"))
        .respond_with(ok(json!({
            "tier_variation": [],
            "model": [
                { "model_id": 9001, "model_sku": first_model_sku, "stock_info_v2": stock(7) },
                { "model_id": 9002, "model_sku": "C", "stock_info_v2": stock(0) }
            ]
        })))
        .mount(server)
        .await;
}

// =============================================================================
// Listing Tests
// =============================================================================

#[tokio::test]
async fn test_list_products_expands_models() {
    let server = MockServer::start().await;
    mount_catalog(&server, false).await;

    let page = client(&server, false).list_products(None).await.unwrap();

    assert_eq!(page.next, None);
    let summary: Vec<(&str, &str, Option<&str>, i64)> = page
        .records
        .iter()
        .map(|r| (r.sku.as_str(), r.item_id.as_str(), r.variant_id.as_deref(), r.stock_quantity))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("A", "101", None, 4),
            ("B", "102", Some("9001"), 7),
            ("C", "102", Some("9002"), 0),
        ]
    );
}

#[tokio::test]
async fn test_fetch_product_with_several_matches_is_an_error() {
    let server = MockServer::start().await;
    mount_catalog(&server, true).await;

    let err = client(&server, false).fetch_product("A").await.unwrap_err();
    match err {
        SyncError::MultipleResults { sku, count, .. } => {
            assert_eq!(sku, "A");
            assert_eq!(count, 2);
        }
        other => panic!("expected MultipleResults, got {other:?}"),
    }

    let err = client(&server, false).fetch_product("Z").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
}

// =============================================================================
// Update Tests
// =============================================================================

#[tokio::test]
async fn test_update_stock_sends_model_and_confirms() {
    let server = MockServer::start().await;
    mount_catalog(&server, false).await;

    // confirmation read of the single item
    Mock::given(method("GET"))
        .and(path("/api/v2/product/get_item_base_info"))
        .and(query_param("item_id_list", "102"))
        .respond_with(ok(json!({
            "item_list": [{ "item_id": 102, "item_sku": "", "has_model": true }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/product/update_stock"))
        .and(body_partial_json(json!({
            "item_id": 102,
            "stock_list": [{ "model_id": 9001, "seller_stock": [{ "stock": 7 }] }]
        })))
        .respond_with(ok(json!({
            "success_list": [{ "model_id": 9001, "stock": 7 }],
            "failure_list": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let item = ItemRef {
        sku: "B".into(),
        item_id: "102".into(),
        variant_id: Some("9001".into()),
    };
    let result = client(&server, true).update_stock(&item, 7).await.unwrap();
    assert!(result.is_success());
}

#[tokio::test]
async fn test_update_stock_failure_list_is_a_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/product/update_stock"))
        .respond_with(ok(json!({
            "success_list": [],
            "failure_list": [{ "model_id": 0, "failed_reason": "item is locked" }]
        })))
        .mount(&server)
        .await;

    let item = ItemRef {
        sku: "A".into(),
        item_id: "101".into(),
        variant_id: None,
    };
    let result = client(&server, true).update_stock(&item, 3).await.unwrap();
    assert_eq!(result.error_code, "failure_list");
    assert!(result.message.contains("item is locked"));
}

#[tokio::test]
async fn test_missing_item_maps_to_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/product/update_stock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "product.error_item_not_found",
            "message": "item not found"
        })))
        .mount(&server)
        .await;

    let item = ItemRef {
        sku: "A".into(),
        item_id: "101".into(),
        variant_id: None,
    };
    let err = client(&server, false).update_stock(&item, 3).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_auth_error_without_refresh_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/product/get_item_list"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "error_auth",
            "message": "Invalid access_token."
        })))
        .mount(&server)
        .await;

    let err = client(&server, false).list_products(None).await.unwrap_err();
    assert!(matches!(err, SyncError::AuthExpired { .. }));
}

// =============================================================================
// Token Refresh Tests
// =============================================================================

#[tokio::test]
async fn test_refresh_stores_new_grant() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbConfig::new(dir.path().join("skeo_sync.db")))
        .await
        .unwrap();

    db.credentials()
        .put(&CredentialRecord::new(
            Platform::Shopee,
            "old",
            "refresh-1",
            Utc::now() - Duration::minutes(1),
        ))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/api/v2/auth/access_token/get"))
        .and(query_param("partner_id", "840001"))
        .and(body_partial_json(json!({ "refresh_token": "refresh-1", "shop_id": 220006 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "",
            "message": "",
            "access_token": "new",
            "refresh_token": "refresh-2",
            "expire_in": 14400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let oauth = OAuth2Service::new(db.clone()).with_endpoint(Arc::new(ShopeeTokenEndpoint::new(
        reqwest::Client::new(),
        &section(&server),
    )));

    let record = oauth.refresh(Platform::Shopee).await.unwrap();
    assert_eq!(record.access_token, "new");
    assert_eq!(record.refresh_token, "refresh-2");

    let remaining = record.expires_at - Utc::now();
    assert!(remaining > Duration::hours(3) && remaining <= Duration::hours(4));

    let stored = db.credentials().get(Platform::Shopee).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "new");
}
