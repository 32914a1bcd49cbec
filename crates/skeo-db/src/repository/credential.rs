//! # Credential Repository (Token Store)
//!
//! Durable OAuth2 credentials, one row per platform.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  put()              upsert, used by manual token resets                │
//! │                                                                         │
//! │  compare_and_swap() UPDATE ... WHERE access_token = <expected>         │
//! │                     used after a refresh: if another process already   │
//! │                     rotated the token, the newer row is kept and the   │
//! │                     caller re-reads it                                  │
//! │                                                                         │
//! │  delete()           removes the platform row                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use skeo_core::{CredentialRecord, Platform};
use sqlx::SqlitePool;
use tracing::debug;

use super::parse_platform;
use crate::error::DbResult;

const TABLE: &str = "oauth2_credentials";

#[derive(sqlx::FromRow)]
struct CredentialRow {
    platform: String,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    scope: Option<String>,
    updated_at: DateTime<Utc>,
}

impl CredentialRow {
    fn into_record(self) -> DbResult<CredentialRecord> {
        Ok(CredentialRecord {
            platform: parse_platform(TABLE, &self.platform)?,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
            scope: self.scope,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for the token store.
#[derive(Debug, Clone)]
pub struct CredentialRepository {
    pool: SqlitePool,
}

impl CredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CredentialRepository { pool }
    }

    /// Returns the stored credential, or `None` if the platform was never
    /// authorized.
    pub async fn get(&self, platform: Platform) -> DbResult<Option<CredentialRecord>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT platform, access_token, refresh_token, expires_at, scope, updated_at
            FROM oauth2_credentials
            WHERE platform = ?1
            "#,
        )
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CredentialRow::into_record).transpose()
    }

    /// Inserts or fully replaces the credential for `record.platform`.
    pub async fn put(&self, record: &CredentialRecord) -> DbResult<()> {
        debug!(
            platform = %record.platform,
            expires_at = %record.expires_at,
            "Storing credential"
        );

        sqlx::query(
            r#"
            INSERT INTO oauth2_credentials (
                platform, access_token, refresh_token, expires_at, scope, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.platform.as_str())
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.expires_at)
        .bind(&record.scope)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replaces the credential only if the stored access token is still
    /// `expected_access_token`.
    ///
    /// Returns `false` when the row changed underneath the caller (or no
    /// longer exists); nothing is written in that case.
    pub async fn compare_and_swap(
        &self,
        record: &CredentialRecord,
        expected_access_token: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE oauth2_credentials SET
                access_token = ?2,
                refresh_token = ?3,
                expires_at = ?4,
                scope = ?5,
                updated_at = ?6
            WHERE platform = ?1 AND access_token = ?7
            "#,
        )
        .bind(record.platform.as_str())
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.expires_at)
        .bind(&record.scope)
        .bind(record.updated_at)
        .bind(expected_access_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Removes the credential. Returns whether a row existed.
    pub async fn delete(&self, platform: Platform) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM oauth2_credentials WHERE platform = ?1")
            .bind(platform.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All stored credentials, ordered by platform.
    pub async fn list(&self) -> DbResult<Vec<CredentialRecord>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT platform, access_token, refresh_token, expires_at, scope, updated_at
            FROM oauth2_credentials
            ORDER BY platform
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CredentialRow::into_record).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
