//! # POS Product Repository
//!
//! The POS-side product cache the reconciler compares against the inventory
//! system.
//!
//! ## Linking
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    How a POS row finds its twin                         │
//! │                                                                         │
//! │  InventoryProduct { id: "INV-7", sku: "COKE-330" }                      │
//! │       │                                                                 │
//! │       ├── 1. pos_products.inventory_id = "INV-7"      → linked          │
//! │       │                                                                 │
//! │       ├── 2. pos_products.sku = "COKE-330"            → link it now     │
//! │       │                                                                 │
//! │       └── 3. no match                                 → import row      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use titan_core::{InventoryProduct, PosProduct};

const SELECT_COLUMNS: &str = r#"
    SELECT id, inventory_id, sku, name, description, price_cents,
           current_stock, is_active, updated_at, last_synced_at
    FROM pos_products
"#;

/// Repository for the POS product cache.
#[derive(Debug, Clone)]
pub struct PosProductRepository {
    pool: SqlitePool,
}

impl PosProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PosProductRepository { pool }
    }

    /// Gets a product by POS id, or `NotFound`.
    pub async fn get(&self, id: &str) -> DbResult<PosProduct> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("PosProduct", id))
    }

    pub async fn find(&self, id: &str) -> DbResult<Option<PosProduct>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let product = sqlx::query_as::<_, PosProduct>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    pub async fn find_by_inventory_id(&self, inventory_id: &str) -> DbResult<Option<PosProduct>> {
        let sql = format!("{SELECT_COLUMNS} WHERE inventory_id = ?1");
        let product = sqlx::query_as::<_, PosProduct>(&sql)
            .bind(inventory_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    pub async fn find_by_sku(&self, sku: &str) -> DbResult<Option<PosProduct>> {
        let sql = format!("{SELECT_COLUMNS} WHERE sku = ?1");
        let product = sqlx::query_as::<_, PosProduct>(&sql)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Every product that has an inventory link, ordered by SKU.
    pub async fn list_linked(&self) -> DbResult<Vec<PosProduct>> {
        let sql = format!("{SELECT_COLUMNS} WHERE inventory_id IS NOT NULL ORDER BY sku");
        let products = sqlx::query_as::<_, PosProduct>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    /// Inserts a product row as given.
    ///
    /// Returns `UniqueViolation` when the SKU or inventory link is taken.
    pub async fn insert(&self, product: &PosProduct) -> DbResult<()> {
        debug!(sku = %product.sku, "Inserting POS product");

        sqlx::query(
            r#"
            INSERT INTO pos_products (
                id, inventory_id, sku, name, description, price_cents,
                current_stock, is_active, updated_at, last_synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.inventory_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price_cents)
        .bind(product.current_stock)
        .bind(product.is_active)
        .bind(product.updated_at)
        .bind(product.last_synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Creates a linked POS row from an inventory product (initial import).
    pub async fn import(&self, source: &InventoryProduct, now: DateTime<Utc>) -> DbResult<PosProduct> {
        let product = PosProduct {
            id: Uuid::new_v4().to_string(),
            inventory_id: Some(source.id.clone()),
            sku: source.sku.clone(),
            name: source.name.clone(),
            description: source.description.clone(),
            price_cents: source.price_cents,
            current_stock: source.stock_quantity,
            is_active: source.is_active,
            updated_at: now,
            last_synced_at: Some(now),
        };

        self.insert(&product).await?;
        debug!(id = %product.id, inventory_id = %source.id, "Imported inventory product");
        Ok(product)
    }

    /// Links a POS product to an inventory product.
    pub async fn link(&self, id: &str, inventory_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE pos_products SET inventory_id = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(inventory_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PosProduct", id));
        }
        Ok(())
    }

    /// Writes the inventory-owned values (stock and price) into the cache.
    pub async fn apply_inventory_values(
        &self,
        id: &str,
        stock: i64,
        price_cents: i64,
        synced_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pos_products SET
                current_stock = ?2,
                price_cents = ?3,
                updated_at = ?4,
                last_synced_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(stock)
        .bind(price_cents)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PosProduct", id));
        }
        Ok(())
    }

    /// Overwrites the cached stock level with the inventory's value.
    pub async fn set_stock(&self, id: &str, stock: i64, synced_at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pos_products SET
                current_stock = ?2,
                updated_at = ?3,
                last_synced_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(stock)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PosProduct", id));
        }
        Ok(())
    }

    /// Stamps `last_synced_at` on a row that needed no changes.
    pub async fn mark_synced(&self, id: &str, synced_at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE pos_products SET last_synced_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(synced_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Counts cached products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pos_products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
