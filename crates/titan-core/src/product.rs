//! # Product Types
//!
//! The two views of a product (POS cache and inventory system of record) and
//! the field-level diff between them.
//!
//! ## Field Authority
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   Field         Authoritative side      Reconciliation writes to        │
//! │   ───────────   ──────────────────      ─────────────────────────       │
//! │   stock         Inventory               POS cache                       │
//! │   price         Inventory               POS cache                       │
//! │   name          POS                     inventory (PATCH)               │
//! │   description   POS                     inventory (PATCH)               │
//! │   active        POS                     inventory (PATCH)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ts_rs::TS;

// =============================================================================
// Inventory Side
// =============================================================================

/// A product as the inventory system knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InventoryProduct {
    pub id: String,
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock_quantity: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// A sellable variant of an inventory product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub stock_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Identity and size of the remote inventory system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InventoryInfo {
    pub name: String,
    pub version: String,
    pub product_count: i64,
    pub warehouse_count: i64,
}

/// Filter and page for product listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// POS-owned fields pushed to the inventory system. `None` = unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.is_active.is_none()
    }
}

// =============================================================================
// POS Side
// =============================================================================

/// A row of the POS product cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PosProduct {
    pub id: String,
    /// Link to the inventory product, once known.
    pub inventory_id: Option<String>,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub current_stock: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Diff
// =============================================================================

/// The side whose value wins for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pos,
    Inventory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ProductField {
    Stock,
    Price,
    Name,
    Description,
    Active,
}

impl ProductField {
    /// Which side owns this field.
    pub fn authority(&self) -> Side {
        match self {
            ProductField::Stock | ProductField::Price => Side::Inventory,
            ProductField::Name | ProductField::Description | ProductField::Active => Side::Pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: ProductField,
    #[ts(type = "unknown")]
    pub pos: Value,
    #[ts(type = "unknown")]
    pub inventory: Value,
    pub authority: Side,
}

/// Field-level differences between a POS product and its inventory twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProductDiff {
    pub inventory_id: String,
    pub pos_product_id: Option<String>,
    pub changes: Vec<FieldChange>,
}

impl ProductDiff {
    /// Compares both views field by field.
    pub fn between(pos: &PosProduct, inventory: &InventoryProduct) -> Self {
        let mut changes = Vec::new();
        let mut push = |field: ProductField, pos: Value, inv: Value| {
            if pos != inv {
                changes.push(FieldChange {
                    field,
                    pos,
                    inventory: inv,
                    authority: field.authority(),
                });
            }
        };

        push(
            ProductField::Stock,
            json!(pos.current_stock),
            json!(inventory.stock_quantity),
        );
        push(
            ProductField::Price,
            json!(pos.price_cents),
            json!(inventory.price_cents),
        );
        push(ProductField::Name, json!(pos.name), json!(inventory.name));
        push(
            ProductField::Description,
            json!(pos.description),
            json!(inventory.description),
        );
        push(
            ProductField::Active,
            json!(pos.is_active),
            json!(inventory.is_active),
        );

        ProductDiff {
            inventory_id: inventory.id.clone(),
            pos_product_id: Some(pos.id.clone()),
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether the POS cache must take inventory-owned values.
    pub fn needs_local_update(&self) -> bool {
        self.changes.iter().any(|c| c.authority == Side::Inventory)
    }

    /// The POS-owned values that must be pushed to inventory.
    pub fn patch_for_inventory(&self, pos: &PosProduct) -> ProductPatch {
        let mut patch = ProductPatch::default();
        for change in self.changes.iter().filter(|c| c.authority == Side::Pos) {
            match change.field {
                ProductField::Name => patch.name = Some(pos.name.clone()),
                // A POS-side cleared description is sent as an empty string
                ProductField::Description => {
                    patch.description = Some(pos.description.clone().unwrap_or_default())
                }
                ProductField::Active => patch.is_active = Some(pos.is_active),
                ProductField::Stock | ProductField::Price => {}
            }
        }
        patch
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
