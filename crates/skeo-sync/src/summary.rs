//! # Pass Reports
//!
//! What a cleanup or sync pass did, per platform. Serialisable so the CLI
//! can print it as JSON.

use serde::Serialize;
use skeo_core::{Platform, SkipReason, StockDelta};
use tracing::{error, info, warn};

/// Outcome of one platform within a sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformSummary {
    pub platform: Platform,
    pub applied: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<(String, String)>,
    /// Deltas computed before applying (or instead of, in a dry run).
    pub planned: Vec<StockDelta>,
    /// Set when a platform-fatal error stopped this platform.
    pub fatal: Option<String>,
}

impl PlatformSummary {
    pub fn new(platform: Platform) -> Self {
        PlatformSummary {
            platform,
            applied: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            planned: Vec::new(),
            fatal: None,
        }
    }

    pub fn skip(&mut self, sku: impl Into<String>, reason: SkipReason) {
        self.skipped.push((sku.into(), reason));
    }

    pub fn skipped_for(&self, reason: SkipReason) -> Vec<&str> {
        self.skipped
            .iter()
            .filter(|(_, r)| *r == reason)
            .map(|(sku, _)| sku.as_str())
            .collect()
    }
}

/// Outcome of a sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub pass_id: String,
    pub read_only: bool,
    pub cancelled: bool,
    pub platforms: Vec<PlatformSummary>,
}

impl SyncReport {
    /// True if any platform hit a fatal error; drives the exit code.
    pub fn has_fatal(&self) -> bool {
        self.platforms.iter().any(|p| p.fatal.is_some())
    }

    pub fn platform(&self, platform: Platform) -> Option<&PlatformSummary> {
        self.platforms.iter().find(|p| p.platform == platform)
    }

    pub fn applied_count(&self) -> usize {
        self.platforms.iter().map(|p| p.applied.len()).sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.platforms.iter().map(|p| p.skipped.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.platforms.iter().map(|p| p.failed.len()).sum()
    }

    /// Emits the summary as structured events.
    pub fn log(&self) {
        for summary in &self.platforms {
            info!(
                pass_id = %self.pass_id,
                platform = %summary.platform,
                applied = summary.applied.len(),
                skipped = summary.skipped.len(),
                failed = summary.failed.len(),
                planned = summary.planned.len(),
                read_only = self.read_only,
                "Platform summary"
            );
            for (sku, reason) in &summary.failed {
                warn!(platform = %summary.platform, sku = %sku, error = %reason, "SKU failed");
            }
            if let Some(fatal) = &summary.fatal {
                error!(platform = %summary.platform, error = %fatal, "Platform aborted");
            }
        }

        info!(
            pass_id = %self.pass_id,
            applied = self.applied_count(),
            skipped = self.skipped_count(),
            failed = self.failed_count(),
            cancelled = self.cancelled,
            "Sync pass finished"
        );
    }
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub orphaned_mappings: u64,
    /// Rows the latest full listing of their marketplace no longer had.
    pub unlisted_mappings: u64,
    pub abandoned_passes: u64,
    pub purged_logs: u64,
}

impl CleanupReport {
    pub fn is_noop(&self) -> bool {
        *self == CleanupReport::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_and_fatal() {
        let mut lazada = PlatformSummary::new(Platform::Lazada);
        lazada.applied.push("2033".into());
        lazada.skip("A", SkipReason::NoOp);

        let mut shopee = PlatformSummary::new(Platform::Shopee);
        shopee.failed.push(("B".into(), "rejected".into()));
        shopee.fatal = Some("token refresh failed".into());

        let report = SyncReport {
            pass_id: "p".into(),
            read_only: false,
            cancelled: false,
            platforms: vec![lazada, shopee],
        };

        assert!(report.has_fatal());
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(
            report.platform(Platform::Lazada).unwrap().skipped_for(SkipReason::NoOp),
            vec!["A"]
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["platforms"][0]["skipped"][0][1], "no-op");
        assert_eq!(json["platforms"][0]["platform"], "LAZADA");
    }

    #[test]
    fn test_cleanup_report_noop() {
        assert!(CleanupReport::default().is_noop());
        assert!(!CleanupReport {
            orphaned_mappings: 1,
            ..Default::default()
        }
        .is_noop());
    }
}
