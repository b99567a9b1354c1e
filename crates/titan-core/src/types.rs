//! # Sync Types
//!
//! The audit-trail model: one [`SyncRecord`] per attempt at synchronizing a
//! unit of work, plus the outcome returned to callers of a cycle.
//!
//! ## Record Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncRecord Lifecycle                            │
//! │                                                                         │
//! │   accepted                  attempt finished                            │
//! │  ┌─────────┐   items   ┌──────────────────────────────┐                │
//! │  │ pending │ ────────► │ success │ partial │ failed    │                │
//! │  └─────────┘           └─────────┴────┬────┴─────┬─────┘                │
//! │       ▲                               │          │                      │
//! │       │        retry (same id,        │          │                      │
//! │       └──────── retry_count + 1) ─────┴──────────┘                      │
//! │                                                                         │
//! │  success  ⇔ items_failed == 0                                          │
//! │  failed   ⇔ items_failed == items_processed > 0                        │
//! │  partial  ⇔ otherwise                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::stock::{SaleData, StockUpdate};

// =============================================================================
// Entity Kinds
// =============================================================================

/// Values stored in `sync_records.entity_type`.
pub mod entity {
    /// The whole product catalog (entity id `all` or a scoped list).
    pub const PRODUCT_CATALOG: &str = "product_catalog";
    /// Stock levels pulled from inventory.
    pub const STOCK: &str = "stock";
    /// Stock pushed because of a completed sale (entity id = sale id).
    pub const SALE: &str = "sale";
    /// An ad-hoc batch of stock updates (entity id = generated uuid).
    pub const STOCK_BATCH: &str = "stock_batch";
    /// Entity id used when a unit of work covers everything.
    pub const ALL: &str = "all";
}

// =============================================================================
// Sync Status
// =============================================================================

/// Status of a single sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Accepted, attempt in flight (or interrupted by a crash).
    Pending,
    /// Every item succeeded (or there was nothing to do).
    Success,
    /// Every item failed.
    Failed,
    /// Some, but not all, items failed.
    Partial,
}

impl SyncStatus {
    /// Derives the terminal status of an attempt from its item counts.
    pub fn from_counts(processed: i64, failed: i64) -> Self {
        if failed <= 0 {
            SyncStatus::Success
        } else if failed >= processed {
            SyncStatus::Failed
        } else {
            SyncStatus::Partial
        }
    }

    /// Whether the attempt has finished.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Pending)
    }

    /// Whether a record in this status can ever be retried.
    #[inline]
    pub fn needs_retry(&self) -> bool {
        matches!(self, SyncStatus::Failed | SyncStatus::Partial)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sync Type / Direction
// =============================================================================

/// What triggered a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "kebab-case"))]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum SyncType {
    Products,
    Stock,
    Manual,
    SaleTriggered,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Products => "products",
            SyncType::Stock => "stock",
            SyncType::Manual => "manual",
            SyncType::SaleTriggered => "sale-triggered",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side receives the changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "kebab-case"))]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    PosToInventory,
    InventoryToPos,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::PosToInventory => f.write_str("pos-to-inventory"),
            SyncDirection::InventoryToPos => f.write_str("inventory-to-pos"),
        }
    }
}

// =============================================================================
// Payload Snapshot
// =============================================================================

/// The request behind a record, stored as JSON so the record can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SyncPayload {
    /// Catalog reconciliation, optionally scoped to some inventory ids.
    Products {
        #[serde(rename = "inventoryIds", default)]
        inventory_ids: Option<Vec<String>>,
    },
    /// Stock pull for POS product ids (empty = every linked product).
    Stock {
        #[serde(rename = "productIds", default)]
        product_ids: Vec<String>,
    },
    /// Stock deltas pushed to inventory.
    StockUpdates { updates: Vec<StockUpdate> },
    /// A completed sale. Line items are resolved to inventory ids on every
    /// run, so a line whose product was linked later succeeds on retry.
    Sale { sale: SaleData },
}

impl SyncPayload {
    /// Narrows the payload to the given item keys.
    ///
    /// Keys are inventory ids for `Products`/`StockUpdates` and POS product
    /// ids for `Stock`/`Sale`. Used when a retry re-runs only the failed
    /// subset.
    pub fn restrict_to(&self, keys: &[String]) -> SyncPayload {
        match self {
            SyncPayload::Products { .. } => SyncPayload::Products {
                inventory_ids: Some(keys.to_vec()),
            },
            SyncPayload::Stock { .. } => SyncPayload::Stock {
                product_ids: keys.to_vec(),
            },
            SyncPayload::StockUpdates { updates } => SyncPayload::StockUpdates {
                updates: take_matching(updates, keys, |u| &u.inventory_id),
            },
            SyncPayload::Sale { sale } => SyncPayload::Sale {
                sale: SaleData {
                    items: take_matching(&sale.items, keys, |line| &line.product_id),
                    ..sale.clone()
                },
            },
        }
    }
}

/// Keeps one entry per key. A key listed twice keeps two entries.
fn take_matching<T: Clone>(entries: &[T], keys: &[String], key_of: impl Fn(&T) -> &String) -> Vec<T> {
    let mut remaining: Vec<&String> = keys.iter().collect();
    entries
        .iter()
        .filter(|entry| match remaining.iter().position(|k| *k == key_of(entry)) {
            Some(idx) => {
                remaining.swap_remove(idx);
                true
            }
            None => false,
        })
        .cloned()
        .collect()
}

// =============================================================================
// Sync Record
// =============================================================================

/// One attempt at synchronizing one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub sync_type: SyncType,
    pub sync_direction: SyncDirection,
    pub status: SyncStatus,

    pub items_processed: i64,
    pub items_succeeded: i64,
    pub items_failed: i64,

    #[ts(as = "Option<String>")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set only once the record reaches a terminal status.
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last time at least one item succeeded.
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,

    pub payload: SyncPayload,
    /// Item keys that failed in the latest attempt.
    pub failed_items: Vec<String>,
    pub error_message: Option<String>,

    pub retry_count: i64,
    #[ts(as = "Option<String>")]
    pub next_retry_at: Option<DateTime<Utc>>,

    pub performed_by_id: Option<String>,
    pub performed_by_username: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Whether a retry is scheduled and its time has come.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Caller attribution for a cycle. Empty for system-triggered work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl SyncContext {
    /// Context for timer- or retry-triggered cycles.
    pub fn system() -> Self {
        SyncContext::default()
    }
}

/// Everything needed to insert a new `pending` record.
#[derive(Debug, Clone)]
pub struct NewSyncRecord {
    pub entity_type: String,
    pub entity_id: String,
    pub sync_type: SyncType,
    pub sync_direction: SyncDirection,
    pub payload: SyncPayload,
    pub context: SyncContext,
}

/// Itemized result of one attempt, written back to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub processed: i64,
    pub succeeded: i64,
    pub failed_items: Vec<String>,
    /// First (or aggregated) error message for the failed items.
    pub error_message: Option<String>,
}

impl AttemptOutcome {
    /// A unit that could not run at all. Keyed [`entity::ALL`] so a retry
    /// re-runs the whole payload.
    pub fn aborted(error_message: impl Into<String>) -> Self {
        AttemptOutcome {
            processed: 1,
            succeeded: 0,
            failed_items: vec![entity::ALL.to_string()],
            error_message: Some(error_message.into()),
        }
    }

    pub fn failed(&self) -> i64 {
        self.failed_items.len() as i64
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus::from_counts(self.processed, self.failed())
    }
}

/// Aggregate counters over the whole record table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub total: i64,
    pub pending: i64,
    pub success: i64,
    pub failed: i64,
    pub partial: i64,
    /// Failed/partial records still under the retry ceiling.
    pub awaiting_retry: i64,
    /// Failed/partial records at the ceiling, waiting for a reset.
    pub exhausted: i64,
    #[ts(as = "Option<String>")]
    pub last_success_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Cycle Outcome
// =============================================================================

/// Aggregated item counts across the records of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
}

/// What a cycle returns to its caller (and what completion events carry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    pub records: Vec<SyncRecord>,
    pub summary: SyncSummary,
}

impl SyncOutcome {
    /// A successful cycle that had nothing to do (e.g. sync disabled).
    pub fn noop(message: impl Into<String>) -> Self {
        SyncOutcome {
            success: true,
            message: message.into(),
            records: Vec::new(),
            summary: SyncSummary::default(),
        }
    }

    /// Builds an outcome from the finished records of a cycle.
    pub fn from_records(records: Vec<SyncRecord>) -> Self {
        let summary = records.iter().fold(SyncSummary::default(), |acc, r| SyncSummary {
            processed: acc.processed + r.items_processed,
            succeeded: acc.succeeded + r.items_succeeded,
            failed: acc.failed + r.items_failed,
        });

        let success = summary.failed == 0;
        let message = if success {
            format!("Synchronized {} item(s)", summary.succeeded)
        } else {
            format!(
                "Synchronized {} of {} item(s), {} failed",
                summary.succeeded, summary.processed, summary.failed
            )
        };

        SyncOutcome {
            success,
            message,
            records,
            summary,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
