//! # Sync Engine
//!
//! Reconciles marketplace stock with the authoritative storefront.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Idle ──► Cleaning ──► Idle                     (cleanup)             │
//! │                                                                         │
//! │   Idle ──► Fetching ──► Diffing ──► Applying ──► Idle      (sync)      │
//! │               │            │           │                                │
//! │               └────────────┴───────────┴──► Failed  (pass-fatal error) │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Isolation
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────────┐
//! │ error                │ effect                                           │
//! ├──────────────────────┼──────────────────────────────────────────────────┤
//! │ RateLimited, 5xx     │ retried with backoff, then recorded for the SKU │
//! │ NotFound             │ SKU skipped                                      │
//! │ UpdateRejected, ...  │ SKU failed, batch continues                      │
//! │ Auth* (after retry)  │ platform stops, other platforms continue        │
//! │ Pagination           │ that listing is abandoned (storefront: pass)    │
//! │ TokenStore           │ whole pass fails                                 │
//! └──────────────────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! Platforms run concurrently. Within a platform at most `concurrency`
//! writes are in flight. Cancellation is checked before every SKU; a write
//! already sent is allowed to finish.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use skeo_core::{compute_deltas, Platform, ProductRecord, SkipReason, StockDelta};
use skeo_db::{Database, PassStatus, SyncLogEntry};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{SyncSettings, MAX_CONCURRENCY};
use crate::error::{SyncError, SyncResult};
use crate::marketplace::{MarketplaceClient, PageCursor, ProductPage};
use crate::retry::RetryPolicy;
use crate::storefront::AuthoritativeSource;
use crate::summary::{CleanupReport, PlatformSummary, SyncReport};

// =============================================================================
// Engine Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Cleaning,
    Fetching,
    Diffing,
    Applying,
    Failed,
}

/// Cooperative cancellation flag shared with the signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Engine tuning derived from `[Sync]`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub stale_pass_after: chrono::Duration,
    pub log_retention: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings::from_config(&SyncSettings::default())
    }
}

impl EngineSettings {
    /// Windows too large for `chrono` saturate here and are rejected by
    /// cleanup instead of overflowing.
    pub fn from_config(settings: &SyncSettings) -> Self {
        EngineSettings {
            concurrency: settings.concurrency.clamp(1, MAX_CONCURRENCY),
            retry: RetryPolicy::from_settings(settings),
            stale_pass_after: chrono::Duration::try_hours(settings.stale_pass_hours)
                .unwrap_or(chrono::Duration::MAX),
            log_retention: chrono::Duration::try_days(settings.log_retention_days)
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}

/// `now - window`, refusing empty, negative or unrepresentable windows.
fn cleanup_cutoff(
    now: DateTime<Utc>,
    window: chrono::Duration,
    key: &str,
) -> SyncResult<DateTime<Utc>> {
    if window <= chrono::Duration::zero() {
        return Err(SyncError::InvalidConfig(format!("{key} must be positive")));
    }
    now.checked_sub_signed(window)
        .ok_or_else(|| SyncError::InvalidConfig(format!("{key} is out of range")))
}

/// What happened to one planned write.
enum SkuOutcome {
    Applied(StockDelta),
    Failed(StockDelta, SyncError),
    Skipped(StockDelta, SkipReason),
    /// Platform-fatal or pass-fatal; stops the platform.
    Fatal(StockDelta, SyncError),
}

// =============================================================================
// Engine
// =============================================================================

pub struct SyncEngine {
    db: Database,
    source: Arc<dyn AuthoritativeSource>,
    clients: Vec<Arc<dyn MarketplaceClient>>,
    /// Platforms that could not be set up (e.g. never authorized).
    unavailable: Vec<(Platform, String)>,
    settings: EngineSettings,
    state: RwLock<EngineState>,
    cancel: CancelToken,
}

impl SyncEngine {
    pub fn new(db: Database, source: Arc<dyn AuthoritativeSource>, settings: EngineSettings) -> Self {
        SyncEngine {
            db,
            source,
            clients: Vec::new(),
            unavailable: Vec::new(),
            settings,
            state: RwLock::new(EngineState::Idle),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_client(mut self, client: Arc<dyn MarketplaceClient>) -> Self {
        self.clients.push(client);
        self
    }

    /// Reports `platform` as fatally failed in every pass.
    pub fn with_unavailable(mut self, platform: Platform, reason: impl Into<String>) -> Self {
        self.unavailable.push((platform, reason.into()));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    async fn set_state(&self, state: EngineState) {
        let mut guard = self.state.write().await;
        if *guard != state {
            debug!(from = ?*guard, to = ?state, "Engine state change");
            *guard = state;
        }
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Removes mapping rows for SKUs the storefront no longer has, closes
    /// stale passes and purges old logs. A second run changes nothing.
    pub async fn cleanup(&self) -> SyncResult<CleanupReport> {
        self.set_state(EngineState::Cleaning).await;
        match self.run_cleanup().await {
            Ok(report) => {
                self.set_state(EngineState::Idle).await;
                info!(
                    orphaned_mappings = report.orphaned_mappings,
                    unlisted_mappings = report.unlisted_mappings,
                    abandoned_passes = report.abandoned_passes,
                    purged_logs = report.purged_logs,
                    "Cleanup finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(EngineState::Failed).await;
                error!(error = %e, "Cleanup failed");
                Err(e)
            }
        }
    }

    async fn run_cleanup(&self) -> SyncResult<CleanupReport> {
        let now = Utc::now();
        let stale_cutoff = cleanup_cutoff(now, self.settings.stale_pass_after, "Sync.StalePassHours")?;
        let log_cutoff = cleanup_cutoff(now, self.settings.log_retention, "Sync.LogRetentionDays")?;

        let source = self.source.clone();
        let authoritative = self
            .collect_pages("storefront list_products", |cursor| {
                let source = source.clone();
                async move { source.list_products(cursor).await }
            })
            .await?;

        let skus: HashSet<String> = authoritative
            .into_iter()
            .map(|r| r.sku.trim().to_string())
            .filter(|sku| !sku.is_empty())
            .collect();

        let mut report = CleanupReport::default();

        self.checkpoint()?;
        if skus.is_empty() {
            warn!("Storefront returned no SKUs, keeping all mappings");
        } else {
            report.orphaned_mappings = self.db.mappings().delete_orphaned(&skus).await?;
        }

        // Orphans go first so a second run sees the same latest listing.
        for platform in Platform::MARKETPLACES {
            self.checkpoint()?;
            report.unlisted_mappings += self.db.mappings().delete_unlisted(platform).await?;
        }

        self.checkpoint()?;
        report.abandoned_passes = self.db.passes().abandon_stale(stale_cutoff).await?;

        self.checkpoint()?;
        report.purged_logs = self.db.passes().purge_logs(log_cutoff).await?;

        Ok(report)
    }

    fn checkpoint(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Runs one sync pass. With `read_only` the plan is computed and logged
    /// but no marketplace write is issued.
    pub async fn sync(&self, read_only: bool) -> SyncResult<SyncReport> {
        let pass = self.db.passes().begin(read_only).await?;
        info!(pass_id = %pass.id, read_only, "Sync pass started");

        match self.run_pass(&pass.id, read_only).await {
            Ok(report) => {
                self.set_state(EngineState::Idle).await;
                let status = if report.cancelled {
                    PassStatus::Cancelled
                } else if report.has_fatal() || report.failed_count() > 0 {
                    PassStatus::CompletedWithErrors
                } else {
                    PassStatus::Completed
                };
                self.db
                    .passes()
                    .finish(
                        &pass.id,
                        status,
                        report.applied_count() as i64,
                        report.skipped_count() as i64,
                        report.failed_count() as i64,
                    )
                    .await?;
                report.log();
                Ok(report)
            }
            Err(e) => {
                self.set_state(EngineState::Failed).await;
                let status = match e {
                    SyncError::Cancelled => PassStatus::Cancelled,
                    _ => PassStatus::Failed,
                };
                error!(pass_id = %pass.id, error = %e, "Sync pass failed");
                if let Err(finish_err) = self.db.passes().finish(&pass.id, status, 0, 0, 0).await {
                    warn!(pass_id = %pass.id, error = %finish_err, "Could not close pass row");
                }
                Err(e)
            }
        }
    }

    async fn run_pass(&self, pass_id: &str, read_only: bool) -> SyncResult<SyncReport> {
        // ---------------------------------------------------------------------
        // Fetching
        // ---------------------------------------------------------------------
        self.set_state(EngineState::Fetching).await;

        let source = self.source.clone();
        let authoritative = self
            .collect_pages("storefront list_products", |cursor| {
                let source = source.clone();
                async move { source.list_products(cursor).await }
            })
            .await?;
        info!(count = authoritative.len(), "Fetched authoritative stock");

        let fetches = self.clients.iter().map(|client| async move {
            let records = self
                .collect_pages("list_products", |cursor| {
                    let client = client.clone();
                    async move { client.list_products(cursor).await }
                })
                .await;
            (client.clone(), records)
        });
        let fetched = join_all(fetches).await;

        let mut summaries: Vec<PlatformSummary> = self
            .unavailable
            .iter()
            .map(|(platform, reason)| {
                let mut summary = PlatformSummary::new(*platform);
                summary.fatal = Some(reason.clone());
                summary
            })
            .collect();

        let mut remote = Vec::new();
        for (client, result) in fetched {
            let platform = client.platform();
            match result {
                Ok(records) => {
                    info!(platform = %platform, count = records.len(), "Fetched marketplace stock");
                    self.db.mappings().upsert_all(&records, pass_id).await?;
                    remote.push((client, records));
                }
                Err(e) if e.is_pass_fatal() => return Err(e),
                Err(e) => {
                    error!(platform = %platform, error = %e, "Could not list marketplace products");
                    let mut summary = PlatformSummary::new(platform);
                    summary.fatal = Some(e.to_string());
                    summaries.push(summary);
                }
            }
        }

        // ---------------------------------------------------------------------
        // Diffing
        // ---------------------------------------------------------------------
        self.set_state(EngineState::Diffing).await;

        let mut logs: Vec<SyncLogEntry> = Vec::new();
        let mut plans = Vec::new();

        for (client, records) in remote {
            let platform = client.platform();
            let plan = compute_deltas(platform, &authoritative, &records);
            let mut summary = PlatformSummary::new(platform);

            for delta in &plan.deltas {
                info!(
                    platform = %platform,
                    sku = %delta.sku,
                    current = delta.current_remote_quantity,
                    desired = delta.desired_quantity,
                    delta = delta.delta(),
                    "Planned stock update"
                );
            }
            for skipped in plan.skipped {
                debug!(platform = %platform, sku = %skipped.sku, reason = %skipped.reason, "Skipped");
                logs.push(SyncLogEntry {
                    platform,
                    sku: skipped.sku.clone(),
                    previous_stock: skipped.current_remote_quantity,
                    computed_stock: skipped.desired_quantity,
                    outcome: skipped.reason.as_str().to_string(),
                    error_code: None,
                    error_description: None,
                });
                summary.skip(skipped.sku, skipped.reason);
            }

            summary.planned = plan.deltas.clone();
            plans.push((client, plan.deltas, summary));
        }

        // ---------------------------------------------------------------------
        // Applying
        // ---------------------------------------------------------------------
        let cancelled_before_apply = self.cancel.is_cancelled();
        if !read_only && !cancelled_before_apply {
            self.set_state(EngineState::Applying).await;
        }

        let applies = plans.into_iter().map(|(client, deltas, summary)| async move {
            let outcomes = if read_only {
                deltas
                    .into_iter()
                    .map(|d| SkuOutcome::Skipped(d, SkipReason::ReadOnly))
                    .collect()
            } else {
                self.apply_platform(&client, deltas).await
            };
            (summary, outcomes)
        });
        let applied = join_all(applies).await;

        let mut pass_fatal = None;
        for (mut summary, outcomes) in applied {
            for outcome in outcomes {
                let entry = record_outcome(&mut summary, outcome, &mut pass_fatal);
                logs.push(entry);
            }
            summaries.push(summary);
        }

        if let Some(e) = pass_fatal {
            return Err(e);
        }

        for entry in &logs {
            if let Err(e) = self.db.passes().record_log(pass_id, entry).await {
                warn!(sku = %entry.sku, error = %e, "Could not record sync log");
            }
        }

        summaries.sort_by_key(|s| s.platform);

        Ok(SyncReport {
            pass_id: pass_id.to_string(),
            read_only,
            cancelled: self.cancel.is_cancelled(),
            platforms: summaries,
        })
    }

    /// Applies one platform's deltas with bounded concurrency.
    async fn apply_platform(
        &self,
        client: &Arc<dyn MarketplaceClient>,
        deltas: Vec<StockDelta>,
    ) -> Vec<SkuOutcome> {
        let abort = AtomicBool::new(false);
        let abort = &abort;
        let platform = client.platform();

        stream::iter(deltas)
            .map(|delta| async move {
                if self.cancel.is_cancelled() {
                    return SkuOutcome::Skipped(delta, SkipReason::Cancelled);
                }
                if abort.load(Ordering::SeqCst) {
                    return SkuOutcome::Skipped(delta, SkipReason::PlatformAborted);
                }

                let item = &delta.item;
                let quantity = delta.desired_quantity;
                let result = self
                    .settings
                    .retry
                    .run("update_stock", || client.update_stock(item, quantity))
                    .await;

                match result {
                    Ok(update) if update.is_success() => {
                        info!(platform = %platform, sku = %delta.sku, quantity, "Stock updated");
                        SkuOutcome::Applied(delta)
                    }
                    Ok(update) => {
                        let err = SyncError::UpdateRejected {
                            platform,
                            code: update.error_code,
                            message: update.message,
                        };
                        warn!(platform = %platform, sku = %delta.sku, error = %err, "Update rejected");
                        SkuOutcome::Failed(delta, err)
                    }
                    Err(SyncError::NotFound { .. }) => {
                        warn!(platform = %platform, sku = %delta.sku, "Listing disappeared");
                        SkuOutcome::Skipped(delta, SkipReason::NotFound)
                    }
                    Err(e) if e.is_platform_fatal() || e.is_pass_fatal() => {
                        abort.store(true, Ordering::SeqCst);
                        error!(platform = %platform, sku = %delta.sku, error = %e, "Stopping platform");
                        SkuOutcome::Fatal(delta, e)
                    }
                    Err(e) => {
                        warn!(platform = %platform, sku = %delta.sku, error = %e, "Update failed");
                        SkuOutcome::Failed(delta, e)
                    }
                }
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await
    }

    /// Drains a paginated listing, retrying each page.
    async fn collect_pages<F, Fut>(&self, label: &str, mut fetch: F) -> SyncResult<Vec<ProductRecord>>
    where
        F: FnMut(Option<PageCursor>) -> Fut,
        Fut: Future<Output = SyncResult<ProductPage>>,
    {
        let mut records = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        let mut seen: HashSet<PageCursor> = HashSet::new();

        loop {
            self.checkpoint()?;

            let current = cursor;
            let page = self.settings.retry.run(label, || fetch(current)).await?;
            records.extend(page.records);

            match page.next {
                Some(next) if !seen.insert(next) => {
                    error!(op = %label, cursor = next.0, pages = seen.len(), "Listing revisited a cursor");
                    return Err(SyncError::Pagination {
                        op: label.to_string(),
                        cursor: next.0,
                    });
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(records)
    }
}

/// Folds one outcome into the platform summary and returns its log row.
fn record_outcome(
    summary: &mut PlatformSummary,
    outcome: SkuOutcome,
    pass_fatal: &mut Option<SyncError>,
) -> SyncLogEntry {
    let platform = summary.platform;
    let entry = |delta: &StockDelta, outcome: &str, error: Option<&SyncError>| SyncLogEntry {
        platform,
        sku: delta.sku.clone(),
        previous_stock: Some(delta.current_remote_quantity),
        computed_stock: Some(delta.desired_quantity),
        outcome: outcome.to_string(),
        error_code: error.map(|e| e.code()),
        error_description: error.map(|e| e.to_string()),
    };

    match outcome {
        SkuOutcome::Applied(delta) => {
            summary.applied.push(delta.sku.clone());
            entry(&delta, "applied", None)
        }
        SkuOutcome::Skipped(delta, reason) => {
            summary.skip(delta.sku.clone(), reason);
            entry(&delta, reason.as_str(), None)
        }
        SkuOutcome::Failed(delta, err) => {
            summary.failed.push((delta.sku.clone(), err.to_string()));
            entry(&delta, "failed", Some(&err))
        }
        SkuOutcome::Fatal(delta, err) => {
            summary.failed.push((delta.sku.clone(), err.to_string()));
            let row = entry(&delta, "failed", Some(&err));
            if summary.fatal.is_none() {
                summary.fatal = Some(err.to_string());
            }
            if err.is_pass_fatal() && pass_fatal.is_none() {
                *pass_fatal = Some(err);
            }
            row
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
