//! # Stock Types
//!
//! Stock deltas pushed to the inventory system, their itemized results, and
//! the sale data that produces them.
//!
//! ## Sale → Deltas
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SaleData { sale_id: "S-104", items }                                   │
//! │    ├── { product_id: p1, quantity: 2 }           ──►  INV-7  -2 (sale)   │
//! │    ├── { product_id: p2, quantity: 1, refund }   ──►  INV-9  +1 (refund) │
//! │    └── { product_id: p3, quantity: 1 } (no link) ──►  item-level failure │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Stock Update
// =============================================================================

/// Classification of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum StockUpdateKind {
    Sale,
    Refund,
    Adjustment,
    Restock,
    Transfer,
    Sync,
}

impl Default for StockUpdateKind {
    fn default() -> Self {
        StockUpdateKind::Adjustment
    }
}

/// A signed stock delta for one inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdate {
    pub inventory_id: String,
    /// Signed delta: negative removes stock, positive adds it.
    pub quantity: i64,
    #[serde(default)]
    pub kind: StockUpdateKind,
    #[serde(default)]
    pub reason: Option<String>,
    /// External reference (sale id, transfer number, ...).
    #[serde(default)]
    pub reference: Option<String>,
}

/// Result of applying one [`StockUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdateResult {
    pub inventory_id: String,
    pub success: bool,
    pub previous_quantity: Option<i64>,
    pub new_quantity: Option<i64>,
    /// Delta actually applied (0 on failure).
    pub applied_delta: i64,
    pub error: Option<String>,
}

impl StockUpdateResult {
    pub fn applied(inventory_id: impl Into<String>, previous: i64, new: i64) -> Self {
        StockUpdateResult {
            inventory_id: inventory_id.into(),
            success: true,
            previous_quantity: Some(previous),
            new_quantity: Some(new),
            applied_delta: new - previous,
            error: None,
        }
    }

    pub fn failed(inventory_id: impl Into<String>, error: impl Into<String>) -> Self {
        StockUpdateResult {
            inventory_id: inventory_id.into(),
            success: false,
            previous_quantity: None,
            new_quantity: None,
            applied_delta: 0,
            error: Some(error.into()),
        }
    }
}

/// Success/failure counts of a bulk update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total: i64,
    pub success_count: i64,
    pub failed_count: i64,
}

/// Itemized result of a bulk update. `results[i]` describes `updates[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResult {
    pub results: Vec<StockUpdateResult>,
    pub summary: BulkSummary,
}

impl BulkUpdateResult {
    pub fn from_results(results: Vec<StockUpdateResult>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count() as i64;
        let total = results.len() as i64;
        BulkUpdateResult {
            summary: BulkSummary {
                total,
                success_count,
                failed_count: total - success_count,
            },
            results,
        }
    }

    /// Inventory ids of the failed items, in input order.
    pub fn failed_ids(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.inventory_id.clone())
            .collect()
    }

    /// First error message among the failed items.
    pub fn first_error(&self) -> Option<String> {
        self.results.iter().find_map(|r| r.error.clone())
    }
}

/// Current stock of one inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub inventory_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Sale Data
// =============================================================================

/// A completed sale handed to the engine after checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleData {
    pub sale_id: String,
    #[serde(default)]
    pub receipt_number: Option<String>,
    pub items: Vec<SaleLineItem>,
}

/// One line of a sale, referencing a POS product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleLineItem {
    pub product_id: String,
    /// Units sold (or returned), always positive.
    pub quantity: i64,
    #[serde(default)]
    pub refund: bool,
}

impl SaleLineItem {
    /// Stock delta for this line: sales remove stock, refunds add it back.
    pub fn delta(&self) -> i64 {
        if self.refund {
            self.quantity
        } else {
            -self.quantity
        }
    }

    pub fn kind(&self) -> StockUpdateKind {
        if self.refund {
            StockUpdateKind::Refund
        } else {
            StockUpdateKind::Sale
        }
    }

    /// Builds the stock update for this line once the inventory link is known.
    pub fn to_update(&self, inventory_id: impl Into<String>, sale_id: &str) -> StockUpdate {
        StockUpdate {
            inventory_id: inventory_id.into(),
            quantity: self.delta(),
            kind: self.kind(),
            reason: None,
            reference: Some(sale_id.to_string()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
