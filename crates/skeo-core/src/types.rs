//! # Domain Types
//!
//! Records exchanged between the storefront, the marketplaces and the
//! token store.
//!
//! ## Record Lifetimes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  CredentialRecord ─── durable, one per platform, outlives every pass   │
//! │                                                                         │
//! │  ProductRecord    ─── built fresh by a fetch, read-only for the pass   │
//! │       │                                                                 │
//! │       └── ItemRef ─── the identifier handed to UpdateStock             │
//! │                                                                         │
//! │  UpdateResult     ─── what the marketplace said about one write        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// =============================================================================
// Platform
// =============================================================================

/// A system taking part in stock reconciliation.
///
/// `Opencart` is the system of record; the others are marketplaces whose
/// listed stock is pushed toward it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Opencart,
    Lazada,
    Shopee,
}

impl Platform {
    /// Marketplaces that receive stock updates.
    pub const MARKETPLACES: [Platform; 2] = [Platform::Lazada, Platform::Shopee];

    /// Identifier used as the token store key and in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Opencart => "OPENCART",
            Platform::Lazada => "LAZADA",
            Platform::Shopee => "SHOPEE",
        }
    }

    pub fn is_marketplace(&self) -> bool {
        !matches!(self, Platform::Opencart)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPENCART" => Ok(Platform::Opencart),
            "LAZADA" => Ok(Platform::Lazada),
            "SHOPEE" => Ok(Platform::Shopee),
            _ => Err(CoreError::UnknownPlatform(s.to_string())),
        }
    }
}

// =============================================================================
// Product Records
// =============================================================================

/// Stock state of one SKU as reported by one platform.
///
/// A fresh instance is created on every fetch. Records are never mutated
/// across passes, so a later pass cannot act on stale quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Seller SKU (the OpenCart "model").
    pub sku: String,
    /// Platform item identifier.
    pub item_id: String,
    /// Platform variant identifier (Lazada SkuId, Shopee model_id).
    pub variant_id: Option<String>,
    /// Sellable quantity.
    pub stock_quantity: i64,
    pub source_platform: Platform,
}

impl ProductRecord {
    pub fn new(
        platform: Platform,
        sku: impl Into<String>,
        item_id: impl Into<String>,
        stock_quantity: i64,
    ) -> Self {
        ProductRecord {
            sku: sku.into(),
            item_id: item_id.into(),
            variant_id: None,
            stock_quantity,
            source_platform: platform,
        }
    }

    pub fn with_variant(mut self, variant_id: impl Into<String>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    /// The identifier a marketplace client needs to write this listing.
    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            sku: self.sku.clone(),
            item_id: self.item_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }
}

/// Identifies one writable listing on a marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub sku: String,
    pub item_id: String,
    pub variant_id: Option<String>,
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant_id {
            Some(variant) => write!(f, "{} ({}/{})", self.sku, self.item_id, variant),
            None => write!(f, "{} ({})", self.sku, self.item_id),
        }
    }
}

// =============================================================================
// Update Result
// =============================================================================

/// Marketplace verdict on a single stock write.
///
/// An empty `error_code` means the write was accepted. Anything else is a
/// business rejection (invalid quantity, locked listing, ...) reported by
/// the platform itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateResult {
    pub error_code: String,
    pub message: String,
}

impl UpdateResult {
    pub fn success() -> Self {
        UpdateResult::default()
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        UpdateResult {
            error_code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code.is_empty()
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// OAuth2 credential for one platform, as held in the token store.
///
/// `Debug` masks both tokens so records can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn new(
        platform: Platform,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        CredentialRecord {
            platform,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            scope: None,
            updated_at: Utc::now(),
        }
    }

    /// True once `expires_at` has passed (no grace period).
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the token expires within `margin` of `now`.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    /// Remaining lifetime, clamped at zero.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        if now >= self.expires_at {
            Duration::zero()
        } else {
            self.expires_at - now
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    pub fn masked_access_token(&self) -> String {
        mask_secret(&self.access_token)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("platform", &self.platform)
            .field("access_token", &mask_secret(&self.access_token))
            .field("refresh_token", &mask_secret(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Shortens a secret to its first and last four characters.
///
/// ```rust
/// use skeo_core::mask_secret;
///
/// assert_eq!(mask_secret("50000601c30atpedfgu3LVvik87Ixlsvle3mSoB7701ceb156fPunYZ43GBg"), "5000…3GBg");
/// assert_eq!(mask_secret("short"), "*****");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip_through_str() {
        for platform in [Platform::Opencart, Platform::Lazada, Platform::Shopee] {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert_eq!("lazada".parse::<Platform>().unwrap(), Platform::Lazada);
        assert!("ebay".parse::<Platform>().is_err());
    }

    #[test]
    fn test_marketplaces_exclude_source() {
        assert!(!Platform::Opencart.is_marketplace());
        assert!(Platform::MARKETPLACES.iter().all(|p| p.is_marketplace()));
    }

    #[test]
    fn test_item_ref_carries_variant() {
        let record = ProductRecord::new(Platform::Shopee, "CPLA175RRD", "1295544772", 4)
            .with_variant("8812");
        let item = record.item_ref();
        assert_eq!(item.variant_id.as_deref(), Some("8812"));
        assert_eq!(item.to_string(), "CPLA175RRD (1295544772/8812)");
    }

    #[test]
    fn test_credential_expiry_windows() {
        let now = Utc::now();
        let record = CredentialRecord::new(
            Platform::Lazada,
            "access",
            "refresh",
            now + Duration::minutes(1),
        );

        assert!(!record.is_expired_at(now));
        assert!(record.needs_refresh_at(now, Duration::minutes(5)));
        assert!(!record.needs_refresh_at(now, Duration::seconds(10)));
        assert!(record.is_expired_at(now + Duration::minutes(2)));
        assert_eq!(record.remaining_at(now + Duration::hours(1)), Duration::zero());
    }

    #[test]
    fn test_credential_debug_masks_tokens() {
        let record = CredentialRecord::new(
            Platform::Shopee,
            "aaaabbbbccccdddd",
            "",
            Utc::now(),
        );
        let debug = format!("{record:?}");
        assert!(!debug.contains("aaaabbbbccccdddd"));
        assert!(debug.contains("aaaa…dddd"));
        assert!(!record.has_refresh_token());
    }

    #[test]
    fn test_update_result_success_flag() {
        assert!(UpdateResult::success().is_success());
        assert!(!UpdateResult::rejected("InvalidQuantity", "negative").is_success());
    }
}
