//! # SKU Mapping Repository
//!
//! Last known marketplace listing for every SKU, refreshed on each pass.
//! Cleanup prunes rows whose SKU no longer exists in the storefront, and
//! rows the marketplace itself stopped listing.

use chrono::{DateTime, Utc};
use skeo_core::{Platform, ProductRecord};
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, info};

use super::parse_platform;
use crate::error::DbResult;

const TABLE: &str = "sku_mappings";

#[derive(sqlx::FromRow)]
struct MappingRow {
    platform: String,
    sku: String,
    item_id: String,
    variant_id: String,
    stock_quantity: i64,
    last_seen_pass: Option<String>,
    updated_at: DateTime<Utc>,
}

/// A stored listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuMapping {
    pub record: ProductRecord,
    pub last_seen_pass: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl MappingRow {
    fn into_mapping(self) -> DbResult<SkuMapping> {
        let platform = parse_platform(TABLE, &self.platform)?;
        let mut record = ProductRecord::new(platform, self.sku, self.item_id, self.stock_quantity);
        if !self.variant_id.is_empty() {
            record.variant_id = Some(self.variant_id);
        }
        Ok(SkuMapping {
            record,
            last_seen_pass: self.last_seen_pass,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for `sku_mappings`.
#[derive(Debug, Clone)]
pub struct SkuMappingRepository {
    pool: SqlitePool,
}

impl SkuMappingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SkuMappingRepository { pool }
    }

    /// Records the listings fetched during `pass_id` in one transaction.
    pub async fn upsert_all(&self, records: &[ProductRecord], pass_id: &str) -> DbResult<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for record in records.iter().filter(|r| !r.sku.trim().is_empty()) {
            let result = sqlx::query(
                r#"
                INSERT INTO sku_mappings (
                    platform, sku, item_id, variant_id, stock_quantity, last_seen_pass, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (platform, sku, item_id, variant_id) DO UPDATE SET
                    stock_quantity = excluded.stock_quantity,
                    last_seen_pass = excluded.last_seen_pass,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(record.source_platform.as_str())
            .bind(record.sku.trim())
            .bind(&record.item_id)
            .bind(record.variant_id.as_deref().unwrap_or(""))
            .bind(record.stock_quantity)
            .bind(pass_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        debug!(count = written, pass_id = %pass_id, "Stored SKU mappings");
        Ok(written)
    }

    /// All listings of `platform`, ordered by SKU.
    pub async fn list(&self, platform: Platform) -> DbResult<Vec<SkuMapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(
            r#"
            SELECT platform, sku, item_id, variant_id, stock_quantity, last_seen_pass, updated_at
            FROM sku_mappings
            WHERE platform = ?1
            ORDER BY sku, item_id, variant_id
            "#,
        )
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MappingRow::into_mapping).collect()
    }

    /// Deletes every mapping whose SKU is not in `authoritative_skus`.
    ///
    /// Returns the number of rows removed; a second call with the same set
    /// removes nothing.
    pub async fn delete_orphaned(&self, authoritative_skus: &HashSet<String>) -> DbResult<u64> {
        let stored: Vec<String> = sqlx::query_scalar("SELECT DISTINCT sku FROM sku_mappings")
            .fetch_all(&self.pool)
            .await?;

        let orphans: Vec<String> = stored
            .into_iter()
            .filter(|sku| !authoritative_skus.contains(sku))
            .collect();

        if orphans.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for sku in &orphans {
            let result = sqlx::query("DELETE FROM sku_mappings WHERE sku = ?1")
                .bind(sku)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;

        info!(skus = orphans.len(), rows = deleted, "Removed orphaned SKU mappings");
        Ok(deleted)
    }

    /// Deletes `platform` rows not refreshed by its most recent listing.
    ///
    /// Every row of one listing shares its pass id and timestamp, so the
    /// newest row identifies the listing. Returns the number of rows removed.
    pub async fn delete_unlisted(&self, platform: Platform) -> DbResult<u64> {
        let latest = self
            .list(platform)
            .await?
            .into_iter()
            .max_by_key(|m| m.updated_at)
            .and_then(|m| m.last_seen_pass);

        let Some(latest) = latest else {
            return Ok(0);
        };

        let result = sqlx::query(
            r#"
            DELETE FROM sku_mappings
            WHERE platform = ?1 AND (last_seen_pass IS NULL OR last_seen_pass <> ?2)
            "#,
        )
        .bind(platform.as_str())
        .bind(&latest)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(platform = %platform, rows = deleted, pass_id = %latest, "Removed unlisted SKU mappings");
        }
        Ok(deleted)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sku_mappings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::open_temp_db;

    fn listings() -> Vec<ProductRecord> {
        vec![
            ProductRecord::new(Platform::Lazada, "2033", "100", 3).with_variant("5001"),
            ProductRecord::new(Platform::Lazada, "GONE", "101", 1).with_variant("5002"),
            ProductRecord::new(Platform::Shopee, "2033", "900", 3),
            ProductRecord::new(Platform::Shopee, "", "901", 3),
        ]
    }

    async fn seed(db: &crate::Database) {
        let pass = db.passes().begin(false).await.unwrap();
        db.mappings().upsert_all(&listings(), &pass.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_skips_empty_sku_and_refreshes_rows() {
        let (_dir, db) = open_temp_db().await;
        seed(&db).await;
        assert_eq!(db.mappings().count().await.unwrap(), 3);

        let updated = vec![ProductRecord::new(Platform::Lazada, "2033", "100", 9).with_variant("5001")];
        db.mappings().upsert_all(&updated, "pass-2").await.unwrap();

        let lazada = db.mappings().list(Platform::Lazada).await.unwrap();
        assert_eq!(lazada.len(), 2);
        assert_eq!(lazada[0].record.stock_quantity, 9);
        assert_eq!(lazada[0].record.variant_id.as_deref(), Some("5001"));
        assert_eq!(lazada[0].last_seen_pass.as_deref(), Some("pass-2"));

        let shopee = db.mappings().list(Platform::Shopee).await.unwrap();
        assert_eq!(shopee[0].record.variant_id, None);
    }

    #[tokio::test]
    async fn test_delete_orphaned_is_idempotent() {
        let (_dir, db) = open_temp_db().await;
        seed(&db).await;

        let source: HashSet<String> = ["2033".to_string()].into_iter().collect();

        assert_eq!(db.mappings().delete_orphaned(&source).await.unwrap(), 1);
        assert_eq!(db.mappings().delete_orphaned(&source).await.unwrap(), 0);
        assert_eq!(db.mappings().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_unlisted_keeps_latest_listing_only() {
        let (_dir, db) = open_temp_db().await;
        seed(&db).await;

        let relisted = vec![ProductRecord::new(Platform::Lazada, "2033", "100", 4).with_variant("5001")];
        db.mappings().upsert_all(&relisted, "pass-2").await.unwrap();

        assert_eq!(db.mappings().delete_unlisted(Platform::Lazada).await.unwrap(), 1);
        assert_eq!(db.mappings().delete_unlisted(Platform::Lazada).await.unwrap(), 0);

        let lazada = db.mappings().list(Platform::Lazada).await.unwrap();
        assert_eq!(lazada.len(), 1);
        assert_eq!(lazada[0].record.sku, "2033");

        // Shopee was never relisted, so its single listing is the latest.
        assert_eq!(db.mappings().delete_unlisted(Platform::Shopee).await.unwrap(), 0);
        assert_eq!(db.mappings().list(Platform::Shopee).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unlisted_on_empty_table() {
        let (_dir, db) = open_temp_db().await;
        assert_eq!(db.mappings().delete_unlisted(Platform::Lazada).await.unwrap(), 0);
    }
}
