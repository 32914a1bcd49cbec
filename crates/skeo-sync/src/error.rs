//! # Sync Error Types
//!
//! Error types for authentication, marketplace calls and sync passes.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │      Auth       │  │     Per-SKU             │ │
//! │  │                 │  │ (platform-fatal)│  │  (recorded, pass goes on)│ │
//! │  │  InvalidConfig  │  │  AuthNotConfig. │  │  NotFound               │ │
//! │  │  ConfigLoad...  │  │  AuthExpired    │  │  MultipleResults        │ │
//! │  │  InvalidInput   │  │  AuthRefresh... │  │  UpdateRejected         │ │
//! │  └─────────────────┘  └─────────────────┘  │  UpdateUnconfirmed      │ │
//! │                                            └─────────────────────────┘ │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transient     │  │   Token store   │  │     Engine              │ │
//! │  │   (retried)     │  │  (pass-fatal)   │  │                         │ │
//! │  │  RateLimited    │  │  TokenStore     │  │  Cancelled              │ │
//! │  │  Transport      │  │                 │  │  Internal               │ │
//! │  │  Timeout, 5xx   │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use skeo_core::Platform;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Caller-supplied value rejected before any I/O.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// The token store holds no credential for the platform.
    #[error("{platform} is not authorized; run the consent flow or reset the access token")]
    AuthNotConfigured { platform: Platform },

    /// The marketplace rejected the access token.
    #[error("{platform} access token expired or was revoked")]
    AuthExpired { platform: Platform },

    /// Exchanging the refresh token failed.
    #[error("{platform} token refresh failed: {reason}")]
    AuthRefreshFailed { platform: Platform, reason: String },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The requested SKU or item does not exist remotely.
    #[error("{platform}: {sku} not found")]
    NotFound { platform: Platform, sku: String },

    /// A lookup that must be unique matched several listings.
    #[error("{platform}: {sku} matches {count} listings")]
    MultipleResults {
        platform: Platform,
        sku: String,
        count: usize,
    },

    /// The platform throttled the call.
    #[error("{platform} rate limit hit")]
    RateLimited {
        platform: Platform,
        retry_after: Option<Duration>,
    },

    /// Platform-reported business error on a write.
    #[error("{platform} rejected update ({code}): {message}")]
    UpdateRejected {
        platform: Platform,
        code: String,
        message: String,
    },

    /// The confirmation read after a write did not show the written value.
    #[error("{platform}: {sku} update not confirmed (expected {expected}, read back {actual})")]
    UpdateUnconfirmed {
        platform: Platform,
        sku: String,
        expected: i64,
        actual: i64,
    },

    /// Any other non-success reply.
    #[error("{platform} API error (HTTP {status}): {message}")]
    Api {
        platform: Platform,
        status: u16,
        message: String,
    },

    /// Connection-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote call exceeded its timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// A paginated listing handed back a cursor it had already produced.
    #[error("{op}: listing revisited cursor {cursor}")]
    Pagination { op: String, cursor: u64 },

    /// A response body did not have the expected shape.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Token Store Errors
    // =========================================================================
    /// Token store I/O failed.
    #[error("Token store error: {0}")]
    TokenStore(String),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// The pass was cancelled.
    #[error("Sync pass cancelled")]
    Cancelled,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<skeo_db::DbError> for SyncError {
    fn from(err: skeo_db::DbError) -> Self {
        SyncError::TokenStore(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::DeserializationFailed(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::DeserializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidConfig(format!("invalid URL: {err}"))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation may succeed when repeated.
    ///
    /// ## Retryable Errors
    /// - Rate limiting
    /// - Connection failures and timeouts
    /// - 5xx replies
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RateLimited { .. } | SyncError::Transport(_) | SyncError::Timeout(_) => true,
            SyncError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the error stops all remaining work for its platform.
    pub fn is_platform_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AuthNotConfigured { .. }
                | SyncError::AuthExpired { .. }
                | SyncError::AuthRefreshFailed { .. }
        )
    }

    /// Returns true if the error stops the whole pass.
    pub fn is_pass_fatal(&self) -> bool {
        matches!(self, SyncError::TokenStore(_) | SyncError::Cancelled)
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_)
        )
    }

    /// Server-suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short machine-readable code stored in `sync_logs.error_code`.
    pub fn code(&self) -> String {
        match self {
            SyncError::UpdateRejected { code, .. } => code.clone(),
            SyncError::InvalidConfig(_) => "invalid_config".into(),
            SyncError::ConfigLoadFailed(_) => "config_load_failed".into(),
            SyncError::InvalidInput(_) => "invalid_input".into(),
            SyncError::AuthNotConfigured { .. } => "auth_not_configured".into(),
            SyncError::AuthExpired { .. } => "auth_expired".into(),
            SyncError::AuthRefreshFailed { .. } => "auth_refresh_failed".into(),
            SyncError::NotFound { .. } => "not_found".into(),
            SyncError::MultipleResults { .. } => "multiple_results".into(),
            SyncError::RateLimited { .. } => "rate_limited".into(),
            SyncError::UpdateUnconfirmed { .. } => "update_unconfirmed".into(),
            SyncError::Api { status, .. } => format!("http_{status}"),
            SyncError::Transport(_) => "transport".into(),
            SyncError::Timeout(_) => "timeout".into(),
            SyncError::Pagination { .. } => "pagination_loop".into(),
            SyncError::DeserializationFailed(_) => "bad_response".into(),
            SyncError::TokenStore(_) => "token_store".into(),
            SyncError::Cancelled => "cancelled".into(),
            SyncError::Internal(_) => "internal".into(),
        }
    }
}
