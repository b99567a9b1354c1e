//! # Validation Module
//!
//! Boundary validation for engine inputs.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Dispatcher (JSON params)                                     │
//! │  └── Shape checks via serde → INVALID_PARAMS                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Settings values (interval > 0)                                    │
//! │  ├── Item-level checks (inventory id, non-zero delta)                  │
//! │  └── Paging and retention bounds                                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite CHECK / UNIQUE constraints)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use titan_core::validation::validate_sync_interval;
//!
//! assert_eq!(validate_sync_interval(60_000).unwrap(), 60_000);
//! assert!(validate_sync_interval(0).is_err());
//! ```

use crate::error::ValidationError;
use crate::stock::{SaleData, StockUpdate};
use crate::MAX_PAGE_SIZE;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Retention longer than ten years is almost certainly a unit mistake.
const MAX_RETENTION_DAYS: i64 = 3_650;

// =============================================================================
// Settings
// =============================================================================

/// Validates a sync interval in milliseconds. Any positive value is accepted.
pub fn validate_sync_interval(interval_ms: i64) -> ValidationResult<u64> {
    if interval_ms <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "syncInterval".to_string(),
        });
    }
    Ok(interval_ms as u64)
}

/// Validates a retention window for record purging.
pub fn validate_days_to_keep(days: i64) -> ValidationResult<u32> {
    if !(0..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(ValidationError::OutOfRange {
            field: "daysToKeep".to_string(),
            min: 0,
            max: MAX_RETENTION_DAYS,
        });
    }
    Ok(days as u32)
}

/// Validates paging parameters and fills in defaults.
///
/// Returns `(limit, offset)`.
pub fn validate_page(
    limit: Option<i64>,
    offset: Option<i64>,
    default_limit: i64,
) -> ValidationResult<(i64, i64)> {
    let limit = limit.unwrap_or(default_limit);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: MAX_PAGE_SIZE,
        });
    }

    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(ValidationError::OutOfRange {
            field: "offset".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok((limit, offset))
}

// =============================================================================
// Stock
// =============================================================================

/// Item-level checks for one stock update.
///
/// A failure here fails only this item, never the batch.
pub fn validate_stock_update(update: &StockUpdate) -> ValidationResult<()> {
    if update.inventory_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "inventoryId".to_string(),
        });
    }

    if update.quantity == 0 {
        return Err(ValidationError::MustBeNonZero {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

/// Validates sale data handed over after checkout.
pub fn validate_sale_data(sale: &SaleData) -> ValidationResult<()> {
    if sale.sale_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "saleId".to_string(),
        });
    }

    for item in &sale.items {
        if item.product_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "items.productId".to_string(),
            });
        }
        if item.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "items.quantity".to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
