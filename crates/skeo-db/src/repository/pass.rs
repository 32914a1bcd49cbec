//! # Sync Pass Repository
//!
//! Audit trail of sync passes and the per-SKU outcome of each.
//!
//! ## Pass Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   begin() ──► running ──► finish() ──► completed                       │
//! │                  │                 ├──► completed_with_errors          │
//! │                  │                 ├──► failed                          │
//! │                  │                 └──► cancelled                       │
//! │                  │                                                      │
//! │                  └── process died ──► abandon_stale() ──► abandoned    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use skeo_core::{Platform, SCRIPT_VERSION};
use sqlx::SqlitePool;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};

// =============================================================================
// Types
// =============================================================================

/// Final (or current) state of a pass row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
    Abandoned,
}

impl PassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassStatus::Running => "running",
            PassStatus::Completed => "completed",
            PassStatus::CompletedWithErrors => "completed_with_errors",
            PassStatus::Failed => "failed",
            PassStatus::Cancelled => "cancelled",
            PassStatus::Abandoned => "abandoned",
        }
    }

    fn parse(value: &str) -> DbResult<Self> {
        Ok(match value {
            "running" => PassStatus::Running,
            "completed" => PassStatus::Completed,
            "completed_with_errors" => PassStatus::CompletedWithErrors,
            "failed" => PassStatus::Failed,
            "cancelled" => PassStatus::Cancelled,
            "abandoned" => PassStatus::Abandoned,
            other => return Err(DbError::corrupt("sync_passes", format!("unknown status {other}"))),
        })
    }
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of `sync_passes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPassRecord {
    pub id: String,
    pub script_version: String,
    pub read_only: bool,
    pub status: PassStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub applied_count: i64,
    pub skipped_count: i64,
    pub failed_count: i64,
}

#[derive(sqlx::FromRow)]
struct PassRow {
    id: String,
    script_version: String,
    read_only: bool,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    applied_count: i64,
    skipped_count: i64,
    failed_count: i64,
}

impl PassRow {
    fn into_record(self) -> DbResult<SyncPassRecord> {
        Ok(SyncPassRecord {
            status: PassStatus::parse(&self.status)?,
            id: self.id,
            script_version: self.script_version,
            read_only: self.read_only,
            started_at: self.started_at,
            finished_at: self.finished_at,
            applied_count: self.applied_count,
            skipped_count: self.skipped_count,
            failed_count: self.failed_count,
        })
    }
}

/// One processed SKU, as written to `sync_logs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLogEntry {
    pub platform: Platform,
    pub sku: String,
    pub previous_stock: Option<i64>,
    pub computed_stock: Option<i64>,
    /// `applied`, `failed`, or a skip reason.
    pub outcome: String,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for `sync_passes` and `sync_logs`.
#[derive(Debug, Clone)]
pub struct SyncPassRepository {
    pool: SqlitePool,
}

const SELECT_PASS: &str = r#"
    SELECT id, script_version, read_only, status, started_at, finished_at,
           applied_count, skipped_count, failed_count
    FROM sync_passes
"#;

impl SyncPassRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncPassRepository { pool }
    }

    /// Opens a new pass in `running` state.
    pub async fn begin(&self, read_only: bool) -> DbResult<SyncPassRecord> {
        let record = SyncPassRecord {
            id: Uuid::new_v4().to_string(),
            script_version: SCRIPT_VERSION.to_string(),
            read_only,
            status: PassStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            applied_count: 0,
            skipped_count: 0,
            failed_count: 0,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_passes (id, script_version, read_only, status, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&record.id)
        .bind(&record.script_version)
        .bind(record.read_only)
        .bind(record.status.as_str())
        .bind(record.started_at)
        .execute(&self.pool)
        .await?;

        debug!(pass_id = %record.id, read_only, "Sync pass started");
        Ok(record)
    }

    /// Closes a pass with its final status and counters.
    pub async fn finish(
        &self,
        id: &str,
        status: PassStatus,
        applied: i64,
        skipped: i64,
        failed: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_passes SET
                status = ?2,
                finished_at = ?3,
                applied_count = ?4,
                skipped_count = ?5,
                failed_count = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(applied)
        .bind(skipped)
        .bind(failed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sync pass", id));
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<SyncPassRecord> {
        let row = sqlx::query_as::<_, PassRow>(&format!("{SELECT_PASS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Sync pass", id))?;
        row.into_record()
    }

    /// Most recently started pass, if any.
    pub async fn latest(&self) -> DbResult<Option<SyncPassRecord>> {
        let row = sqlx::query_as::<_, PassRow>(&format!(
            "{SELECT_PASS} ORDER BY started_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(PassRow::into_record).transpose()
    }

    /// Appends a per-SKU outcome to pass `pass_id`.
    pub async fn record_log(&self, pass_id: &str, entry: &SyncLogEntry) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_logs (
                pass_id, platform, sku, previous_stock, computed_stock,
                outcome, error_code, error_description, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(pass_id)
        .bind(entry.platform.as_str())
        .bind(&entry.sku)
        .bind(entry.previous_stock)
        .bind(entry.computed_stock)
        .bind(&entry.outcome)
        .bind(&entry.error_code)
        .bind(&entry.error_description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn log_count(&self, pass_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_logs WHERE pass_id = ?1")
            .bind(pass_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Marks passes still `running` that started before `cutoff` as
    /// `abandoned`. These are left behind by processes that died mid-pass.
    pub async fn abandon_stale(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_passes SET status = ?1, finished_at = ?2
            WHERE status = ?3 AND started_at < ?4
            "#,
        )
        .bind(PassStatus::Abandoned.as_str())
        .bind(Utc::now())
        .bind(PassStatus::Running.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(count = result.rows_affected(), "Marked stale sync passes as abandoned");
        }
        Ok(result.rows_affected())
    }

    /// Deletes per-SKU logs written before `cutoff`.
    pub async fn purge_logs(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sync_logs WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            info!(count = result.rows_affected(), "Purged old sync logs");
        }
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::open_temp_db;
    use chrono::Duration;

    fn entry(sku: &str, outcome: &str) -> SyncLogEntry {
        SyncLogEntry {
            platform: Platform::Lazada,
            sku: sku.to_string(),
            previous_stock: Some(3),
            computed_stock: Some(5),
            outcome: outcome.to_string(),
            error_code: None,
            error_description: None,
        }
    }

    #[tokio::test]
    async fn test_begin_and_finish_pass() {
        let (_dir, db) = open_temp_db().await;
        let repo = db.passes();

        let pass = repo.begin(true).await.unwrap();
        assert_eq!(pass.status, PassStatus::Running);
        assert_eq!(pass.script_version, SCRIPT_VERSION);

        repo.finish(&pass.id, PassStatus::CompletedWithErrors, 2, 5, 1)
            .await
            .unwrap();

        let loaded = repo.get(&pass.id).await.unwrap();
        assert_eq!(loaded.status, PassStatus::CompletedWithErrors);
        assert!(loaded.read_only);
        assert!(loaded.finished_at.is_some());
        assert_eq!((loaded.applied_count, loaded.skipped_count, loaded.failed_count), (2, 5, 1));
        assert_eq!(repo.latest().await.unwrap().unwrap().id, pass.id);
    }

    #[tokio::test]
    async fn test_finish_unknown_pass_is_not_found() {
        let (_dir, db) = open_temp_db().await;
        let err = db
            .passes()
            .finish("missing", PassStatus::Completed, 0, 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_logs_require_existing_pass() {
        let (_dir, db) = open_temp_db().await;
        let repo = db.passes();

        let pass = repo.begin(false).await.unwrap();
        repo.record_log(&pass.id, &entry("2033", "applied")).await.unwrap();
        assert_eq!(repo.log_count(&pass.id).await.unwrap(), 1);

        let err = repo.record_log("no-such-pass", &entry("2033", "applied")).await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_abandon_and_purge_are_idempotent() {
        let (_dir, db) = open_temp_db().await;
        let repo = db.passes();

        let pass = repo.begin(false).await.unwrap();
        repo.record_log(&pass.id, &entry("A", "no-op")).await.unwrap();

        let future = Utc::now() + Duration::hours(1);
        assert_eq!(repo.abandon_stale(future).await.unwrap(), 1);
        assert_eq!(repo.abandon_stale(future).await.unwrap(), 0);
        assert_eq!(repo.get(&pass.id).await.unwrap().status, PassStatus::Abandoned);

        assert_eq!(repo.purge_logs(future).await.unwrap(), 1);
        assert_eq!(repo.purge_logs(future).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_running_pass_is_not_abandoned() {
        let (_dir, db) = open_temp_db().await;
        let repo = db.passes();
        repo.begin(false).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(24);
        assert_eq!(repo.abandon_stale(cutoff).await.unwrap(), 0);
    }
}
