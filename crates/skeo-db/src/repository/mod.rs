//! # Repository Module
//!
//! Repositories over the SKEO Sync tables.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  db.credentials()  → CredentialRepository  → oauth2_credentials        │
//! │  db.mappings()     → SkuMappingRepository  → sku_mappings              │
//! │  db.passes()       → SyncPassRepository    → sync_passes, sync_logs    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queries are checked at runtime (`sqlx::query` / `query_as`) so the crate
//! builds without a prepared database.

pub mod credential;
pub mod mapping;
pub mod pass;

use skeo_core::Platform;

use crate::error::{DbError, DbResult};

/// Parses a stored platform column.
pub(crate) fn parse_platform(table: &str, value: &str) -> DbResult<Platform> {
    value
        .parse()
        .map_err(|_| DbError::corrupt(table, format!("unknown platform {value}")))
}
