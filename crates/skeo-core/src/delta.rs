//! # Delta Planning
//!
//! Compares the authoritative snapshot with one marketplace snapshot and
//! decides, per SKU, whether a stock write is needed.
//!
//! ## Decision Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  remote SKU seen...            │ outcome                               │
//! │  ──────────────────────────────┼────────────────────────────────────── │
//! │  more than once                │ skipped: duplicate-remote             │
//! │  source lists it twice         │ skipped: duplicate-source             │
//! │  absent from source            │ skipped: not-in-source                │
//! │  desired == current            │ skipped: no-op                        │
//! │  desired != current            │ StockDelta { desired - current }      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! SKUs are visited in ascending order, so two plans built from the same
//! snapshots are identical (the dry run logs exactly what a live run would
//! submit).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::types::{ItemRef, Platform, ProductRecord};

// =============================================================================
// Types
// =============================================================================

/// Why a SKU was not written during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Remote stock already matches.
    NoOp,
    /// The marketplace lists a SKU the storefront does not know.
    NotInSource,
    /// The marketplace lists the SKU on more than one listing.
    DuplicateRemote,
    /// The storefront lists the SKU more than once.
    DuplicateSource,
    /// The listing disappeared before it could be written.
    NotFound,
    /// Dry run.
    ReadOnly,
    /// The pass was cancelled before this SKU was reached.
    Cancelled,
    /// An earlier platform-fatal error stopped this platform.
    PlatformAborted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoOp => "no-op",
            SkipReason::NotInSource => "not-in-source",
            SkipReason::DuplicateRemote => "duplicate-remote",
            SkipReason::DuplicateSource => "duplicate-source",
            SkipReason::NotFound => "not-found",
            SkipReason::ReadOnly => "read-only",
            SkipReason::Cancelled => "cancelled",
            SkipReason::PlatformAborted => "platform-aborted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending stock write for one SKU on one marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub sku: String,
    pub platform: Platform,
    /// Listing to write.
    pub item: ItemRef,
    pub current_remote_quantity: i64,
    pub desired_quantity: i64,
}

impl StockDelta {
    /// Signed difference `desired - current`.
    pub fn delta(&self) -> i64 {
        self.desired_quantity - self.current_remote_quantity
    }
}

/// A SKU the planner decided not to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSku {
    pub sku: String,
    pub reason: SkipReason,
    pub current_remote_quantity: Option<i64>,
    pub desired_quantity: Option<i64>,
}

/// Result of comparing the two snapshots for one marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeltaPlan {
    pub deltas: Vec<StockDelta>,
    pub skipped: Vec<SkippedSku>,
}

impl DeltaPlan {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Builds the write plan for `platform`.
///
/// Desired stock is the authoritative quantity clamped at zero. Records with
/// an empty SKU are ignored on both sides. A SKU is never planned more than
/// once, which keeps every SKU to at most one update per platform per pass.
pub fn compute_deltas(
    platform: Platform,
    authoritative: &[ProductRecord],
    remote: &[ProductRecord],
) -> DeltaPlan {
    let mut desired: HashMap<&str, i64> = HashMap::with_capacity(authoritative.len());
    let mut duplicated_in_source: HashSet<&str> = HashSet::new();

    for record in authoritative {
        let sku = record.sku.trim();
        if sku.is_empty() {
            continue;
        }
        if desired.insert(sku, record.stock_quantity.max(0)).is_some() {
            duplicated_in_source.insert(sku);
        }
    }

    let mut listings: BTreeMap<&str, Vec<&ProductRecord>> = BTreeMap::new();
    for record in remote {
        let sku = record.sku.trim();
        if sku.is_empty() {
            continue;
        }
        listings.entry(sku).or_default().push(record);
    }

    let mut plan = DeltaPlan::default();

    for (sku, entries) in listings {
        let current = entries[0].stock_quantity;
        let wanted = desired.get(sku).copied();

        let skip = |reason| SkippedSku {
            sku: sku.to_string(),
            reason,
            current_remote_quantity: Some(current),
            desired_quantity: wanted,
        };

        if entries.len() > 1 {
            plan.skipped.push(skip(SkipReason::DuplicateRemote));
            continue;
        }
        if duplicated_in_source.contains(sku) {
            plan.skipped.push(skip(SkipReason::DuplicateSource));
            continue;
        }

        match wanted {
            None => plan.skipped.push(skip(SkipReason::NotInSource)),
            Some(quantity) if quantity == current => plan.skipped.push(skip(SkipReason::NoOp)),
            Some(quantity) => plan.deltas.push(StockDelta {
                sku: sku.to_string(),
                platform,
                item: entries[0].item_ref(),
                current_remote_quantity: current,
                desired_quantity: quantity,
            }),
        }
    }

    plan
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn source(sku: &str, qty: i64) -> ProductRecord {
        ProductRecord::new(Platform::Opencart, sku, format!("oc-{sku}"), qty)
    }

    fn lazada(sku: &str, qty: i64) -> ProductRecord {
        ProductRecord::new(Platform::Lazada, sku, format!("lz-{sku}"), qty)
            .with_variant(format!("sku-{sku}"))
    }

    #[test]
    fn test_single_sku_positive_delta() {
        let plan = compute_deltas(Platform::Lazada, &[source("2033", 5)], &[lazada("2033", 3)]);

        assert_eq!(plan.deltas.len(), 1);
        let delta = &plan.deltas[0];
        assert_eq!(delta.sku, "2033");
        assert_eq!(delta.delta(), 2);
        assert_eq!(delta.desired_quantity, 5);
        assert_eq!(delta.item.item_id, "lz-2033");
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_matching_sku_is_no_op() {
        let plan = compute_deltas(
            Platform::Lazada,
            &[source("A", 10), source("B", 9)],
            &[lazada("A", 10), lazada("B", 7)],
        );

        assert_eq!(plan.deltas.len(), 1);
        assert_eq!(plan.deltas[0].sku, "B");
        assert_eq!(plan.deltas[0].delta(), 2);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].sku, "A");
        assert_eq!(plan.skipped[0].reason, SkipReason::NoOp);
    }

    #[test]
    fn test_zero_delta_never_planned() {
        let authoritative: Vec<_> = (0..20).map(|i| source(&format!("S{i}"), i % 4)).collect();
        let remote: Vec<_> = (0..20).map(|i| lazada(&format!("S{i}"), i % 3)).collect();

        let plan = compute_deltas(Platform::Lazada, &authoritative, &remote);
        assert!(plan.deltas.iter().all(|d| d.delta() != 0));
        for delta in &plan.deltas {
            assert_eq!(delta.delta(), delta.desired_quantity - delta.current_remote_quantity);
        }
        assert_eq!(plan.deltas.len() + plan.skipped.len(), 20);
    }

    #[test]
    fn test_negative_source_stock_clamped() {
        let plan = compute_deltas(Platform::Shopee, &[source("X", -3)], &[lazada("X", 2)]);
        assert_eq!(plan.deltas[0].desired_quantity, 0);
        assert_eq!(plan.deltas[0].delta(), -2);
    }

    #[test]
    fn test_unknown_and_duplicate_skus_skipped() {
        let plan = compute_deltas(
            Platform::Lazada,
            &[source("D", 1), source("D", 2), source("R", 4)],
            &[lazada("D", 0), lazada("R", 1), lazada("R", 1), lazada("ORPHAN", 3)],
        );

        assert!(plan.deltas.is_empty());
        let reasons: Vec<_> = plan.skipped.iter().map(|s| (s.sku.as_str(), s.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                ("D", SkipReason::DuplicateSource),
                ("ORPHAN", SkipReason::NotInSource),
                ("R", SkipReason::DuplicateRemote),
            ]
        );
    }

    #[test]
    fn test_empty_skus_ignored_and_order_is_stable() {
        let authoritative = vec![source("b", 1), source("a", 1), source("", 7)];
        let remote = vec![lazada("b", 0), lazada("", 0), lazada("a", 0)];

        let first = compute_deltas(Platform::Lazada, &authoritative, &remote);
        let second = compute_deltas(Platform::Lazada, &authoritative, &remote);

        assert_eq!(first, second);
        let skus: Vec<_> = first.deltas.iter().map(|d| d.sku.as_str()).collect();
        assert_eq!(skus, vec!["a", "b"]);
    }

    #[test]
    fn test_skip_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&SkipReason::NoOp).unwrap();
        assert_eq!(json, "\"no-op\"");
        assert_eq!(SkipReason::PlatformAborted.to_string(), "platform-aborted");
    }
}
