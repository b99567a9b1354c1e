//! # titan-db: Database Layer for the Inventory Sync Engine
//!
//! SQLite storage for the sync audit trail, the engine settings and the POS
//! product cache, using sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Inventory Sync Data Flow                            │
//! │                                                                         │
//! │  SyncCoordinator / RetryScheduler / StockReconciler                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     titan-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │    Repositories    │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ SyncRecordRepo     │  │ 001 records│  │   │
//! │  │   │ SqlitePool    │◄───│ SettingsRepo       │  │ 002 config │  │   │
//! │  │   │ WAL mode      │    │ PosProductRepo     │  │ 003 cache  │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  titan-inventory.db (platform data dir, see BridgeConfig)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use titan_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("titan-inventory.db")).await?;
//! let due = db.sync_records().due_for_retry(Utc::now(), 5).await?;
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

// Repository re-exports for convenience
pub use repository::product::PosProductRepository;
pub use repository::settings::SettingsRepository;
pub use repository::sync_record::{HistoryFilter, SyncRecordRepository, INTERRUPTED_MESSAGE};
