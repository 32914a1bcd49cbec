//! # skeo-db: Database Layer for SKEO Sync
//!
//! Durable state of the syncer, kept in one SQLite file (`Common.Store`).
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SKEO Sync Data Flow                              │
//! │                                                                         │
//! │  skeo-sync (OAuth2 service, sync engine)                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     skeo-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │  │   │
//! │  │   │               │    │ Credential     │   │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SkuMapping     │   │ 001_initial  │  │   │
//! │  │   │ WAL, FKs      │    │ SyncPass       │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ./skeo_sync.db                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skeo_db::{Database, DbConfig};
//! use skeo_core::Platform;
//!
//! let db = Database::new(DbConfig::new("./skeo_sync.db")).await?;
//! let credential = db.credentials().get(Platform::Lazada).await?;
//! db.close().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::credential::CredentialRepository;
pub use repository::mapping::{SkuMapping, SkuMappingRepository};
pub use repository::pass::{PassStatus, SyncLogEntry, SyncPassRecord, SyncPassRepository};

/// Default store location when `Common.Store` is not configured.
pub const DEFAULT_DB_PATH: &str = "./skeo_sync.db";
