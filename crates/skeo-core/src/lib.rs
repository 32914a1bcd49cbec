//! # skeo-core: Pure Domain Logic for SKEO Sync
//!
//! Types shared by every layer of the syncer plus the delta planner that
//! decides which marketplace listings need a stock write.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SKEO Sync Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    skeo-cli (clap binary)                       │   │
//! │  │    sync, cleanup, lzreauth, shreauth, chkconfig                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        skeo-sync (OAuth2, clients, engine, procedures)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ skeo-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                 │   │
//! │  │   │   types   │  │   delta   │  │   error   │                 │   │
//! │  │   │ Platform  │  │ DeltaPlan │  │ CoreError │                 │   │
//! │  │   │ Product   │  │ SkipReason│  │           │                 │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                 │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use skeo_core::{compute_deltas, Platform, ProductRecord};
//!
//! let source = vec![ProductRecord::new(Platform::Opencart, "2033", "17", 5)];
//! let remote = vec![ProductRecord::new(Platform::Lazada, "2033", "9001", 3)];
//!
//! let plan = compute_deltas(Platform::Lazada, &source, &remote);
//! assert_eq!(plan.deltas.len(), 1);
//! assert_eq!(plan.deltas[0].delta(), 2);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod delta;
pub mod error;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use delta::{compute_deltas, DeltaPlan, SkipReason, SkippedSku, StockDelta};
pub use error::{CoreError, CoreResult};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Version string recorded on every sync pass row.
pub const SCRIPT_VERSION: &str = env!("CARGO_PKG_VERSION");
