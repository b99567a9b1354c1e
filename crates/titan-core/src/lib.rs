//! # titan-core: Pure Domain Model for Inventory Sync
//!
//! This crate describes everything the inventory sync engine talks about,
//! as plain data and pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Titan POS Inventory Sync                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 inventory-bridge (axum)                          │   │
//! │  │        POST /rpc ──► Dispatcher        GET /events (ws)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  titan-inventory (engine)                        │   │
//! │  │   Coordinator, Reconciler, RetryScheduler, Probe, Notifier      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ titan-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   stock   │  │  product  │  │ settings  │  │   │
//! │  │   │SyncRecord │  │StockUpdate│  │ PosProduct│  │SyncSetting│  │   │
//! │  │   │SyncStatus │  │ BulkResult│  │ProductDiff│  │ validation│  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    titan-db (Database Layer)                    │   │
//! │  │       sync_records, sync_settings, pos_products repositories    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Sync records, statuses, payload snapshots, cycle outcomes
//! - [`stock`] - Stock deltas, bulk results, sale data
//! - [`product`] - POS and inventory product shapes, field-level diffing
//! - [`settings`] - Engine settings and the typed setting enum
//! - [`error`] - Domain error types
//! - [`validation`] - Boundary validation
//!
//! ## Example Usage
//!
//! ```rust
//! use titan_core::types::SyncStatus;
//!
//! // 3 items processed, 1 failed -> partial
//! assert_eq!(SyncStatus::from_counts(3, 1), SyncStatus::Partial);
//! // Nothing to do is still a success
//! assert_eq!(SyncStatus::from_counts(0, 0), SyncStatus::Success);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod product;
pub mod settings;
pub mod stock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use product::*;
pub use settings::{SyncSetting, SyncSettings};
pub use stock::*;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default period between automatic product cycles (5 minutes).
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 300_000;

/// Lower bound on the effective timer period.
///
/// Any positive interval is accepted and stored, but the timer never ticks
/// faster than this.
pub const MIN_TICK_INTERVAL_MS: u64 = 1_000;

/// Default number of retry attempts before a record is frozen.
pub const DEFAULT_MAX_RETRIES: i64 = 5;

/// Default age (in days) after which terminal records are purged.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Largest page a history/product listing may request.
pub const MAX_PAGE_SIZE: i64 = 1_000;
