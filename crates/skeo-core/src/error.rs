//! # Error Types
//!
//! Domain-specific error types for skeo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  skeo-core errors (this file)                                          │
//! │  └── CoreError        - Parsing / domain rule failures                 │
//! │                                                                         │
//! │  skeo-db errors (separate crate)                                       │
//! │  └── DbError          - Token store and audit table failures           │
//! │                                                                         │
//! │  skeo-sync errors (separate crate)                                     │
//! │  └── SyncError        - Auth, marketplace and engine failures          │
//! │                                                                         │
//! │  Flow: CoreError → DbError → SyncError → exit code                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Domain errors raised while interpreting records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A platform identifier did not match any known system.
    ///
    /// ## When This Occurs
    /// - A row in the token store carries an unexpected `platform` value
    /// - A CLI or config value names an unsupported marketplace
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// A stock quantity outside the accepted range.
    #[error("Invalid quantity for {sku}: {quantity}")]
    InvalidQuantity { sku: String, quantity: i64 },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
