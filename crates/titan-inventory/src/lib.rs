//! # titan-inventory: Inventory Sync Engine for Titan POS
//!
//! Keeps the POS product cache and the external inventory system in step.
//! Every synchronization attempt is written to a durable record so failed
//! work can be retried with backoff and audited afterwards.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Inventory Sync Engine                            │
//! │                                                                         │
//! │   timer tick ──┐     sale ──┐     POST /rpc ──► Dispatcher              │
//! │                ▼            ▼                      │                    │
//! │  ┌──────────────────────────────────────────────────▼──────────────┐   │
//! │  │                     SyncCoordinator                             │   │
//! │  │   single-flight flag • settings • periodic timer                │   │
//! │  └──────┬──────────────┬──────────────────┬───────────────┬────────┘   │
//! │         │              │                  │               │            │
//! │         ▼              ▼                  ▼               ▼            │
//! │  ┌────────────┐ ┌──────────────┐ ┌────────────────┐ ┌─────────────┐   │
//! │  │ Connection │ │    Stock     │ │ RetryScheduler │ │   Event     │   │
//! │  │   Probe    │ │  Reconciler  │ │                │ │  Notifier   │   │
//! │  │            │ │              │ │ backoff, force │ │             │   │
//! │  │ health +   │ │ per-item     │ │ retry, reset,  │ │ *_completed │   │
//! │  │ timeout    │ │ stock/catalog│ │ purge, recover │ │ config_upd. │   │
//! │  └─────┬──────┘ └──────┬───────┘ └───────┬────────┘ └─────────────┘   │
//! │        │               │                 │                             │
//! │        ▼               ▼                 ▼                             │
//! │  ┌───────────────────────────┐   ┌─────────────────────────────────┐  │
//! │  │  InventoryClient (trait)  │   │  titan-db                       │  │
//! │  │  HttpInventoryClient      │   │  sync_records, sync_settings,   │  │
//! │  │  (reqwest, REST/JSON)     │   │  pos_products                   │  │
//! │  └───────────────────────────┘   └─────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`coordinator`] - `SyncCoordinator`: cycles, timer, settings, status
//! - [`reconciler`] - `StockReconciler`: per-item stock and catalog work
//! - [`retry`] - `RetryPolicy` and `RetryScheduler`
//! - [`probe`] - `ConnectionProbe`
//! - [`notifier`] - `EventNotifier` publish/subscribe
//! - [`client`] - `InventoryClient` trait and the HTTP implementation
//! - [`dispatch`] - `{method, params}` envelope routing
//! - [`config`] - `BridgeConfig` (TOML + environment)
//! - [`error`] - `SyncError`, `InventoryError`, `ErrorCode`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use titan_db::{Database, DbConfig};
//! use titan_inventory::{BridgeConfig, Dispatcher, EventNotifier, HttpInventoryClient, SyncCoordinator};
//!
//! let config = BridgeConfig::load(None)?;
//! let db = Database::new(DbConfig::new(&config.database.path)).await?;
//! let client = Arc::new(HttpInventoryClient::new(&config.inventory)?);
//!
//! let engine = Arc::new(SyncCoordinator::new(&db, client, &config, EventNotifier::new()).await?);
//! engine.start();
//!
//! let response = Dispatcher::new(engine).dispatch("getStatus", serde_json::Value::Null).await;
//! assert!(response.status);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod notifier;
pub mod probe;
pub mod reconciler;
pub mod retry;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{HttpInventoryClient, InventoryClient, InventoryResult, StockAdjustment};
pub use config::{
    BridgeConfig, DatabaseConfig, InventoryConfig, ReconcilerConfig, RetryConfig, ServerConfig,
    SyncDefaults,
};
pub use coordinator::{
    BulkStockOutcome, CleanupReport, DetailedStatus, EngineStatus, FullConfig, ManualSyncOptions,
    StockUpdateOutcome, SyncCoordinator,
};
pub use dispatch::{Dispatcher, Request, Response};
pub use error::{ErrorCode, InventoryError, SyncError, SyncResult};
pub use notifier::{EventEnvelope, EventNotifier, Subscription, SyncEvent};
pub use probe::{ConnectionProbe, ConnectionStatus};
pub use reconciler::{ItemResult, StockReconciler};
pub use retry::{RetryPolicy, RetryScheduler};
