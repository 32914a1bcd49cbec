//! # Sync Configuration
//!
//! Configuration for the token store, the storefront and each marketplace.
//! Loaded once at startup and then passed by reference into every procedure.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SKEO_STORE=/var/lib/skeo/skeo_sync.db                              │
//! │     SKEO_LAZADA_APP_SECRET=...                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config / CONFIG_PATH / ./config.toml /                           │
//! │     ~/.config/skeo-sync/config.toml (Linux)                            │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [Common]
//! Store = "./skeo_sync.db"
//!
//! [Opencart]
//! Domain = "https://shop.example.com"
//! Username = "skeo"
//! ApiKey = "..."
//!
//! [Lazada]
//! Domain = "https://api.lazada.com.ph/rest"
//! AppKey = "102505"
//! AppSecret = "..."
//!
//! [Shopee]
//! ShopID = 220006
//! PartnerID = 840001
//! PartnerKey = "..."
//!
//! [Sync]
//! Concurrency = 3
//! WithConfirm = true
//! ```
//!
//! A marketplace takes part in sync only when its section is present.

use serde::{Deserialize, Serialize};
use skeo_core::Platform;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// Upper bound on concurrent SKU writes per platform.
pub const MAX_CONCURRENCY: usize = 5;

/// Upper bound on `Sync.StalePassHours` (one year).
pub const MAX_STALE_PASS_HOURS: i64 = 24 * 365;

/// Upper bound on `Sync.LogRetentionDays` (ten years).
pub const MAX_LOG_RETENTION_DAYS: i64 = 3650;

// =============================================================================
// Sections
// =============================================================================

/// `[Common]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonSection {
    /// Path of the SQLite token store.
    #[serde(rename = "Store", default = "default_store")]
    pub store: PathBuf,
}

fn default_store() -> PathBuf {
    PathBuf::from(skeo_db::DEFAULT_DB_PATH)
}

impl Default for CommonSection {
    fn default() -> Self {
        CommonSection {
            store: default_store(),
        }
    }
}

/// `[Opencart]`: the authoritative storefront.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpencartSection {
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "ApiKey")]
    pub api_key: String,
}

/// `[Lazada]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LazadaSection {
    /// Regional REST gateway, e.g. `https://api.lazada.com.ph/rest`.
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "AppKey")]
    pub app_key: String,
    #[serde(rename = "AppSecret")]
    pub app_secret: String,
    /// Host serving `/oauth/authorize` and `/rest/auth/token/refresh`.
    #[serde(rename = "AuthDomain", default = "default_lazada_auth_domain")]
    pub auth_domain: String,
    #[serde(rename = "RedirectURL", default)]
    pub redirect_url: Option<String>,
}

fn default_lazada_auth_domain() -> String {
    "https://auth.lazada.com".to_string()
}

/// `[Shopee]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopeeSection {
    #[serde(rename = "ShopID")]
    pub shop_id: i64,
    #[serde(rename = "PartnerID")]
    pub partner_id: i64,
    #[serde(rename = "PartnerKey")]
    pub partner_key: String,
    #[serde(rename = "Domain", default = "default_shopee_domain")]
    pub domain: String,
    #[serde(rename = "RedirectURL", default)]
    pub redirect_url: Option<String>,
}

fn default_shopee_domain() -> String {
    "https://partner.shopeemobile.com".to_string()
}

/// `[Sync]`: engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Concurrent SKU writes per platform (1..=5).
    #[serde(rename = "Concurrency", default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per remote call when throttled or on transient failures.
    #[serde(rename = "MaxAttempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "InitialBackoffMs", default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(rename = "MaxBackoffSecs", default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Timeout applied to every HTTP request.
    #[serde(rename = "RequestTimeoutSecs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Re-read each listing after writing it.
    #[serde(rename = "WithConfirm", default = "default_true")]
    pub with_confirm: bool,

    /// Refresh and retry once when a marketplace rejects the token.
    #[serde(rename = "WithRefresh", default = "default_true")]
    pub with_refresh: bool,

    /// Age after which a pass still marked running is considered dead.
    #[serde(rename = "StalePassHours", default = "default_stale_pass_hours")]
    pub stale_pass_hours: i64,

    #[serde(rename = "LogRetentionDays", default = "default_log_retention_days")]
    pub log_retention_days: i64,
}

fn default_concurrency() -> usize {
    3
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_stale_pass_hours() -> i64 {
    24
}
fn default_log_retention_days() -> i64 {
    90
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            request_timeout_secs: default_request_timeout(),
            with_confirm: true,
            with_refresh: true,
            stale_pass_hours: default_stale_pass_hours(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(rename = "Common", default)]
    pub common: CommonSection,

    #[serde(rename = "Opencart", default)]
    pub opencart: Option<OpencartSection>,

    #[serde(rename = "Lazada", default)]
    pub lazada: Option<LazadaSection>,

    #[serde(rename = "Shopee", default)]
    pub shopee: Option<ShopeeSection>,

    #[serde(rename = "Sync", default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Loads configuration from `path`, applies environment overrides and
    /// validates the result.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file
    /// 3. Environment variables
    pub fn load(path: &Path) -> SyncResult<Self> {
        info!(path = %path.display(), "Loading config");
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::ConfigLoadFailed(format!("{}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without overrides or validation.
    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Picks the config file to load.
    ///
    /// An explicit path always wins; otherwise `./config.toml` if present,
    /// then the per-user config directory.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        if let Some(path) = explicit {
            return path;
        }
        let local = PathBuf::from("config.toml");
        if local.exists() {
            return local;
        }
        Self::default_config_path()
            .filter(|p| p.exists())
            .unwrap_or(local)
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "skeo", "skeo-sync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.common.store.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig("Common.Store must not be empty".into()));
        }

        if let Some(opencart) = &self.opencart {
            require("Opencart.Domain", &opencart.domain)?;
            require("Opencart.Username", &opencart.username)?;
            require("Opencart.ApiKey", &opencart.api_key)?;
            Url::parse(&opencart.domain)?;
        }

        if let Some(lazada) = &self.lazada {
            require("Lazada.Domain", &lazada.domain)?;
            require("Lazada.AppKey", &lazada.app_key)?;
            require("Lazada.AppSecret", &lazada.app_secret)?;
            Url::parse(&lazada.domain)?;
            Url::parse(&lazada.auth_domain)?;
        }

        if let Some(shopee) = &self.shopee {
            if shopee.shop_id <= 0 || shopee.partner_id <= 0 {
                return Err(SyncError::InvalidConfig(
                    "Shopee.ShopID and Shopee.PartnerID must be positive".into(),
                ));
            }
            require("Shopee.PartnerKey", &shopee.partner_key)?;
            Url::parse(&shopee.domain)?;
        }

        let sync = &self.sync;
        if sync.concurrency == 0 || sync.concurrency > MAX_CONCURRENCY {
            return Err(SyncError::InvalidConfig(format!(
                "Sync.Concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                sync.concurrency
            )));
        }
        if sync.max_attempts == 0 {
            return Err(SyncError::InvalidConfig("Sync.MaxAttempts must be at least 1".into()));
        }
        if sync.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "Sync.RequestTimeoutSecs must be greater than 0".into(),
            ));
        }
        if !(1..=MAX_STALE_PASS_HOURS).contains(&sync.stale_pass_hours) {
            return Err(SyncError::InvalidConfig(format!(
                "Sync.StalePassHours must be between 1 and {MAX_STALE_PASS_HOURS}, got {}",
                sync.stale_pass_hours
            )));
        }
        if !(1..=MAX_LOG_RETENTION_DAYS).contains(&sync.log_retention_days) {
            return Err(SyncError::InvalidConfig(format!(
                "Sync.LogRetentionDays must be between 1 and {MAX_LOG_RETENTION_DAYS}, got {}",
                sync.log_retention_days
            )));
        }

        Ok(())
    }

    /// Applies overrides read through `lookup` (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(store) = lookup("SKEO_STORE") {
            debug!(store = %store, "Overriding store path from environment");
            self.common.store = PathBuf::from(store);
        }

        if let Some(concurrency) = lookup("SKEO_SYNC_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.sync.concurrency = concurrency;
        }

        if let (Some(lazada), Some(secret)) = (self.lazada.as_mut(), lookup("SKEO_LAZADA_APP_SECRET")) {
            debug!("Overriding Lazada app secret from environment");
            lazada.app_secret = secret;
        }

        if let (Some(shopee), Some(key)) = (self.shopee.as_mut(), lookup("SKEO_SHOPEE_PARTNER_KEY")) {
            debug!("Overriding Shopee partner key from environment");
            shopee.partner_key = key;
        }

        if let (Some(opencart), Some(key)) = (self.opencart.as_mut(), lookup("SKEO_OPENCART_API_KEY")) {
            debug!("Overriding OpenCart API key from environment");
            opencart.api_key = key;
        }
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Marketplaces with a config section, in a fixed order.
    pub fn enabled_marketplaces(&self) -> Vec<Platform> {
        let mut platforms = Vec::new();
        if self.lazada.is_some() {
            platforms.push(Platform::Lazada);
        }
        if self.shopee.is_some() {
            platforms.push(Platform::Shopee);
        }
        platforms
    }

    /// Names of the sections present in the file.
    pub fn sections(&self) -> Vec<&'static str> {
        let mut sections = vec!["Common"];
        if self.opencart.is_some() {
            sections.push("Opencart");
        }
        if self.lazada.is_some() {
            sections.push("Lazada");
        }
        if self.shopee.is_some() {
            sections.push("Shopee");
        }
        sections.push("Sync");
        sections
    }

    pub fn opencart(&self) -> SyncResult<&OpencartSection> {
        self.opencart
            .as_ref()
            .ok_or_else(|| SyncError::InvalidConfig("missing [Opencart] section".into()))
    }

    pub fn lazada(&self) -> SyncResult<&LazadaSection> {
        self.lazada
            .as_ref()
            .ok_or_else(|| SyncError::InvalidConfig("missing [Lazada] section".into()))
    }

    pub fn shopee(&self) -> SyncResult<&ShopeeSection> {
        self.shopee
            .as_ref()
            .ok_or_else(|| SyncError::InvalidConfig("missing [Shopee] section".into()))
    }
}

fn require(key: &str, value: &str) -> SyncResult<()> {
    if value.trim().is_empty() {
        return Err(SyncError::InvalidConfig(format!("{key} must not be empty")));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const FULL: &str = r#"
        [Common]
        Store = "/tmp/skeo.db"

        [Opencart]
        Domain = "https://shop.example.com"
        Username = "skeo"
        ApiKey = "oc-key"

        [Lazada]
        Domain = "https://api.lazada.com.ph/rest"
        AppKey = "102505"
        AppSecret = "lz-secret"

        [Shopee]
        ShopID = 220006
        PartnerID = 840001
        PartnerKey = "sh-key"

        [Sync]
        Concurrency = 5
        WithConfirm = false
    "#;

    #[test]
    fn test_full_config_parses() {
        let config = SyncConfig::from_toml(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.common.store, PathBuf::from("/tmp/skeo.db"));
        assert_eq!(config.lazada().unwrap().app_key, "102505");
        assert_eq!(config.lazada().unwrap().auth_domain, "https://auth.lazada.com");
        assert_eq!(config.shopee().unwrap().shop_id, 220006);
        assert_eq!(config.shopee().unwrap().domain, "https://partner.shopeemobile.com");
        assert_eq!(config.sync.concurrency, 5);
        assert!(!config.sync.with_confirm);
        assert!(config.sync.with_refresh);
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(
            config.enabled_marketplaces(),
            vec![Platform::Lazada, Platform::Shopee]
        );
        assert_eq!(
            config.sections(),
            vec!["Common", "Opencart", "Lazada", "Shopee", "Sync"]
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = SyncConfig::from_toml("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.common.store, PathBuf::from("./skeo_sync.db"));
        assert!(config.enabled_marketplaces().is_empty());
        assert!(config.opencart().is_err());
        assert_eq!(config.sync.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_concurrency_bounds_validated() {
        let mut config = SyncConfig::from_toml(FULL).unwrap();
        config.sync.concurrency = 6;
        assert!(config.validate().unwrap_err().is_config_error());

        config.sync.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cleanup_windows_validated() {
        let mut config = SyncConfig::from_toml(FULL).unwrap();

        for hours in [-1, 0, MAX_STALE_PASS_HOURS + 1, i64::MAX] {
            config.sync.stale_pass_hours = hours;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("Sync.StalePassHours"), "{hours}: {err}");
        }
        config.sync.stale_pass_hours = MAX_STALE_PASS_HOURS;
        config.validate().unwrap();

        for days in [-5, 0, MAX_LOG_RETENTION_DAYS + 1, 1_000_000_000] {
            config.sync.log_retention_days = days;
            let err = config.validate().unwrap_err();
            assert!(err.is_config_error());
            assert!(err.to_string().contains("Sync.LogRetentionDays"), "{days}: {err}");
        }
        config.sync.log_retention_days = 1;
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let doc = FULL.replace("AppSecret = \"lz-secret\"", "AppSecret = \"\"");
        let config = SyncConfig::from_toml(&doc).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Lazada.AppSecret"));
    }

    #[test]
    fn test_env_overrides_apply_to_present_sections() {
        let env: HashMap<&str, &str> = [
            ("SKEO_STORE", "/data/skeo.db"),
            ("SKEO_SYNC_CONCURRENCY", "2"),
            ("SKEO_SHOPEE_PARTNER_KEY", "from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::from_toml(FULL).unwrap();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.common.store, PathBuf::from("/data/skeo.db"));
        assert_eq!(config.sync.concurrency, 2);
        assert_eq!(config.shopee().unwrap().partner_key, "from-env");
        assert_eq!(config.lazada().unwrap().app_secret, "lz-secret");
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = SyncConfig::load(Path::new("/nonexistent/skeo/config.toml")).unwrap_err();
        assert!(matches!(err, SyncError::ConfigLoadFailed(_)));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, FULL).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert!(config.opencart.is_some());
        assert_eq!(SyncConfig::resolve_path(Some(path.clone())), path);
    }
}
