//! # skeo-sync: Stock Sync Engine for SKEO
//!
//! Pushes OpenCart stock levels to the Lazada and Shopee marketplaces.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stock Sync Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  procedures (entry points)                       │  │
//! │  │  cleanup • sync(read_only) • shopee auth URL • lazada reset      │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │                       SyncEngine                                 │  │
//! │  │  Idle → Fetching → Diffing → Applying → Idle                    │  │
//! │  └───────┬──────────────────────┬─────────────────────────┬─────────┘  │
//! │          ▼                      ▼                         ▼            │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────┐    │
//! │  │ OpencartClient │  │ MarketplaceClient  │  │   OAuth2Service    │    │
//! │  │                │  │                    │  │                    │    │
//! │  │ authoritative  │  │ LazadaClient       │─►│ token store,       │    │
//! │  │ stock          │  │ ShopeeClient       │  │ refresh, consent   │    │
//! │  └────────────────┘  └────────────────────┘  └─────────┬──────────┘    │
//! │                                                        ▼               │
//! │                                              skeo-db (SQLite)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML configuration (`[Common]`, `[Opencart]`, `[Lazada]`, ...)
//! - [`error`] - Sync error types and their fatality classes
//! - [`retry`] - Bounded backoff for throttled and transient calls
//! - [`oauth2`] - Token retrieval, refresh and consent URLs
//! - [`marketplace`] - The marketplace client trait and its Lazada/Shopee implementations
//! - [`storefront`] - The OpenCart authoritative source
//! - [`engine`] - The sync state machine
//! - [`summary`] - Pass reports
//! - [`procedures`] - Command entry points
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skeo_sync::{do_sync_procedure, CancelToken, SyncConfig};
//!
//! let config = SyncConfig::load(&SyncConfig::resolve_path(None))?;
//! let report = do_sync_procedure(&config, true, CancelToken::new()).await?;
//! println!("planned: {}", report.platforms.iter().map(|p| p.planned.len()).sum::<usize>());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod marketplace;
pub mod oauth2;
pub mod procedures;
pub mod retry;
pub mod storefront;
pub mod summary;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{SyncConfig, SyncSettings};
pub use engine::{CancelToken, EngineSettings, EngineState, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use marketplace::{AuthSession, ClientOptions, MarketplaceClient, PageCursor, ProductPage};
pub use oauth2::{OAuth2Service, TokenEndpoint, TokenGrant, TokenReset};
pub use procedures::{
    do_check_config, do_cleanup_procedure, do_generate_shopee_shop_authorization_url,
    do_lazada_reset_access_token, do_sync_procedure, ConfigCheck, CredentialStatus,
};
pub use retry::RetryPolicy;
pub use storefront::{AuthoritativeSource, OpencartClient};
pub use summary::{CleanupReport, PlatformSummary, SyncReport};
