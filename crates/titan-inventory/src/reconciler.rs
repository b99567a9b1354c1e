//! # Stock Reconciler
//!
//! Applies stock deltas to the inventory system and reconciles the POS
//! product cache with the inventory catalog. Every item is independent:
//! one failure never aborts the rest of a batch.
//!
//! ## Field Authority
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Field         Owner        During reconcile_products                  │
//! │  ───────────   ─────────    ────────────────────────────────────────   │
//! │  stock         inventory    written into pos_products                   │
//! │  price         inventory    written into pos_products                   │
//! │  name          POS          PATCH /products/{id}                        │
//! │  description   POS          PATCH /products/{id}                        │
//! │  active        POS          PATCH /products/{id}                        │
//! │                                                                         │
//! │  Unlinked POS rows are matched by SKU and linked. Inventory products   │
//! │  with no POS row are imported.                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::InventoryClient;
use crate::error::{InventoryError, SyncResult};
use titan_core::validation::validate_stock_update;
use titan_core::{
    entity, AttemptOutcome, BulkUpdateResult, InventoryProduct, PosProduct, ProductDiff,
    ProductQuery, SaleData, StockUpdate, StockUpdateResult,
};
use titan_db::{DbError, PosProductRepository};

// =============================================================================
// Item Results
// =============================================================================

/// Outcome of one item within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    /// Inventory id, or POS product id for stock pulls.
    pub key: String,
    pub error: Option<String>,
}

impl ItemResult {
    fn ok(key: impl Into<String>) -> Self {
        ItemResult {
            key: key.into(),
            error: None,
        }
    }

    pub(crate) fn failed(key: impl Into<String>, error: impl ToString) -> Self {
        ItemResult {
            key: key.into(),
            error: Some(error.to_string()),
        }
    }
}

/// Folds item results into the counters written to a record.
pub fn summarize(items: &[ItemResult]) -> AttemptOutcome {
    let failed: Vec<&ItemResult> = items.iter().filter(|i| i.error.is_some()).collect();
    let error_message = failed.first().and_then(|first| {
        first.error.as_ref().map(|e| {
            if failed.len() == 1 {
                format!("{}: {}", first.key, e)
            } else {
                format!("{} items failed, first {}: {}", failed.len(), first.key, e)
            }
        })
    });

    AttemptOutcome {
        processed: items.len() as i64,
        succeeded: (items.len() - failed.len()) as i64,
        failed_items: failed.iter().map(|i| i.key.clone()).collect(),
        error_message,
    }
}

/// One item per bulk result, keyed by inventory id.
pub fn bulk_items(bulk: &BulkUpdateResult) -> Vec<ItemResult> {
    bulk.results
        .iter()
        .map(|r| ItemResult {
            key: r.inventory_id.clone(),
            error: r.error.clone(),
        })
        .collect()
}

/// What a catalog pass did, for logging.
#[derive(Debug, Default, Clone, Copy)]
struct CatalogChange {
    linked: bool,
    imported: bool,
    pulled: bool,
    pushed: bool,
}

/// Running tallies of a catalog pass.
#[derive(Debug, Default, Clone, Copy)]
struct CatalogTotals {
    linked: usize,
    imported: usize,
    pulled: usize,
    pushed: usize,
}

impl CatalogTotals {
    fn record(&mut self, change: CatalogChange) {
        self.linked += usize::from(change.linked);
        self.imported += usize::from(change.imported);
        self.pulled += usize::from(change.pulled);
        self.pushed += usize::from(change.pushed);
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Per-item mutation engine between the POS cache and the inventory system.
#[derive(Clone)]
pub struct StockReconciler {
    client: Arc<dyn InventoryClient>,
    products: PosProductRepository,
    max_concurrency: usize,
    page_size: i64,
}

impl StockReconciler {
    pub fn new(
        client: Arc<dyn InventoryClient>,
        products: PosProductRepository,
        max_concurrency: usize,
        page_size: i64,
    ) -> Self {
        StockReconciler {
            client,
            products,
            max_concurrency: max_concurrency.max(1),
            page_size: page_size.max(1),
        }
    }

    // =========================================================================
    // Bulk Stock Updates
    // =========================================================================

    /// Applies every update independently. `results[i]` describes `updates[i]`.
    pub async fn apply_updates(&self, updates: &[StockUpdate]) -> BulkUpdateResult {
        let results: Vec<StockUpdateResult> = stream::iter(updates.to_vec())
            .map(|update| async move { self.apply_one(&update).await })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let bulk = BulkUpdateResult::from_results(results);
        debug!(
            total = bulk.summary.total,
            succeeded = bulk.summary.success_count,
            failed = bulk.summary.failed_count,
            "Bulk stock update applied"
        );
        bulk
    }

    async fn apply_one(&self, update: &StockUpdate) -> StockUpdateResult {
        if let Err(e) = validate_stock_update(update) {
            return StockUpdateResult::failed(&update.inventory_id, e.to_string());
        }

        let adjustment = match self.client.adjust_stock(update).await {
            Ok(adjustment) => adjustment,
            Err(e) => {
                debug!(inventory_id = %update.inventory_id, error = %e, "Stock adjustment failed");
                return StockUpdateResult::failed(&update.inventory_id, e.to_string());
            }
        };

        // The remote write stands even if the cache cannot follow
        if let Err(e) = self
            .mirror_stock(&update.inventory_id, adjustment.new_quantity)
            .await
        {
            warn!(inventory_id = %update.inventory_id, error = %e, "Failed to mirror stock into POS cache");
        }

        StockUpdateResult::applied(
            &update.inventory_id,
            adjustment.previous_quantity,
            adjustment.new_quantity,
        )
    }

    // =========================================================================
    // Sale Movements
    // =========================================================================

    /// Pushes the stock movements of a sale. Items are keyed by POS product
    /// id, one per line, in line order.
    ///
    /// Inventory links are resolved on every call. A line whose product is
    /// unknown or unlinked fails on its own.
    pub async fn apply_sale(&self, sale: &SaleData) -> SyncResult<Vec<ItemResult>> {
        let mut items: Vec<Option<ItemResult>> = Vec::with_capacity(sale.items.len());
        let mut resolved = Vec::new();
        let mut updates = Vec::new();

        for (index, line) in sale.items.iter().enumerate() {
            match self.products.find(&line.product_id).await? {
                Some(PosProduct {
                    inventory_id: Some(inventory_id),
                    ..
                }) => {
                    resolved.push(index);
                    updates.push(line.to_update(inventory_id, &sale.sale_id));
                    items.push(None);
                }
                Some(_) => items.push(Some(ItemResult::failed(
                    &line.product_id,
                    format!("POS product {} is not linked to inventory", line.product_id),
                ))),
                None => items.push(Some(ItemResult::failed(
                    &line.product_id,
                    format!("POS product not found: {}", line.product_id),
                ))),
            }
        }

        let bulk = self.apply_updates(&updates).await;
        for (index, result) in resolved.into_iter().zip(bulk.results) {
            let key = &sale.items[index].product_id;
            items[index] = Some(match result.error {
                Some(error) => ItemResult::failed(key, error),
                None => ItemResult::ok(key),
            });
        }

        Ok(items.into_iter().flatten().collect())
    }

    async fn mirror_stock(&self, inventory_id: &str, quantity: i64) -> Result<(), DbError> {
        if let Some(product) = self.products.find_by_inventory_id(inventory_id).await? {
            self.products.set_stock(&product.id, quantity, Utc::now()).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Stock Pull
    // =========================================================================

    /// Copies inventory stock levels into the POS cache.
    ///
    /// An empty `product_ids` means every linked product.
    pub async fn pull_stock(&self, product_ids: &[String]) -> SyncResult<Vec<ItemResult>> {
        let targets: Vec<String> = if product_ids.is_empty() {
            self.products
                .list_linked()
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect()
        } else {
            product_ids.to_vec()
        };

        let items: Vec<ItemResult> = stream::iter(targets)
            .map(|id| async move {
                match self.pull_one(&id).await {
                    Ok(()) => ItemResult::ok(id),
                    Err(e) => ItemResult::failed(id, e),
                }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;
        Ok(items)
    }

    async fn pull_one(&self, product_id: &str) -> Result<(), String> {
        let product = self
            .products
            .find(product_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("POS product not found: {product_id}"))?;
        let inventory_id = product
            .inventory_id
            .as_deref()
            .ok_or_else(|| format!("POS product {product_id} is not linked to inventory"))?;

        let level = self
            .client
            .get_stock(inventory_id)
            .await
            .map_err(|e| e.to_string())?;

        self.products
            .set_stock(&product.id, level.quantity, Utc::now())
            .await
            .map_err(|e| e.to_string())
    }

    // =========================================================================
    // Product Reconciliation
    // =========================================================================

    /// Reconciles the catalog, or only `inventory_ids` when given.
    ///
    /// A failed catalog listing yields a single failed item keyed
    /// [`entity::ALL`], so a retry re-runs the whole pass.
    pub async fn reconcile_products(&self, inventory_ids: Option<&[String]>) -> Vec<ItemResult> {
        let mut items = Vec::new();
        let sources: Vec<InventoryProduct> = match inventory_ids {
            Some(ids) => {
                let fetched: Vec<(String, Result<InventoryProduct, InventoryError>)> =
                    stream::iter(ids.to_vec())
                        .map(|id| async move {
                            let result = self.client.get_product(&id).await;
                            (id, result)
                        })
                        .buffered(self.max_concurrency)
                        .collect()
                        .await;
                let mut found = Vec::new();
                for (id, result) in fetched {
                    match result {
                        Ok(product) => found.push(product),
                        Err(e) => items.push(ItemResult::failed(id, e)),
                    }
                }
                found
            }
            None => match self.fetch_catalog().await {
                Ok(all) => all,
                Err(e) => {
                    warn!(error = %e, "Failed to list inventory catalog");
                    return vec![ItemResult::failed(entity::ALL, e)];
                }
            },
        };

        let results: Vec<(ItemResult, CatalogChange)> = stream::iter(sources)
            .map(|source| async move {
                match self.reconcile_one(&source).await {
                    Ok(change) => (ItemResult::ok(source.id), change),
                    Err(e) => {
                        debug!(inventory_id = %source.id, error = %e, "Product reconcile failed");
                        (ItemResult::failed(source.id, e), CatalogChange::default())
                    }
                }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut totals = CatalogTotals::default();
        for (item, change) in results {
            totals.record(change);
            items.push(item);
        }
        info!(
            items = items.len(),
            linked = totals.linked,
            imported = totals.imported,
            pulled = totals.pulled,
            pushed = totals.pushed,
            "Product reconciliation pass finished"
        );
        items
    }

    /// Walks the whole catalog page by page.
    async fn fetch_catalog(&self) -> Result<Vec<InventoryProduct>, InventoryError> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let query = ProductQuery {
                search: None,
                limit: Some(self.page_size),
                offset: Some(offset),
            };
            let page = self.client.list_products(&query).await?;
            let fetched = page.len() as i64;
            all.extend(page);
            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }
        Ok(all)
    }

    async fn reconcile_one(&self, source: &InventoryProduct) -> Result<CatalogChange, String> {
        let mut change = CatalogChange::default();
        let now = Utc::now();

        let pos = match self.locate(source, &mut change).await.map_err(|e| e.to_string())? {
            Some(pos) => pos,
            None => {
                self.products
                    .import(source, now)
                    .await
                    .map_err(|e| e.to_string())?;
                change.imported = true;
                return Ok(change);
            }
        };

        let diff = ProductDiff::between(&pos, source);
        if diff.is_empty() {
            self.products
                .mark_synced(&pos.id, now)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(change);
        }

        let patch = diff.patch_for_inventory(&pos);
        if !patch.is_empty() {
            self.client
                .update_product_details(&source.id, &patch)
                .await
                .map_err(|e| e.to_string())?;
            change.pushed = true;
        }

        // Also stamps last_synced_at, so runs even when only POS fields moved
        self.products
            .apply_inventory_values(&pos.id, source.stock_quantity, source.price_cents, now)
            .await
            .map_err(|e| e.to_string())?;
        change.pulled = diff.needs_local_update();

        Ok(change)
    }

    /// Finds the POS twin by link, then by SKU (linking it).
    async fn locate(
        &self,
        source: &InventoryProduct,
        change: &mut CatalogChange,
    ) -> Result<Option<PosProduct>, DbError> {
        if let Some(pos) = self.products.find_by_inventory_id(&source.id).await? {
            return Ok(Some(pos));
        }

        match self.products.find_by_sku(&source.sku).await? {
            Some(mut pos) if pos.inventory_id.is_none() => {
                self.products.link(&pos.id, &source.id).await?;
                pos.inventory_id = Some(source.id.clone());
                change.linked = true;
                debug!(pos_id = %pos.id, inventory_id = %source.id, "Linked POS product by SKU");
                Ok(Some(pos))
            }
            Some(pos) => Err(DbError::UniqueViolation {
                field: "pos_products.sku".to_string(),
                value: format!("{} (linked to {:?})", pos.sku, pos.inventory_id),
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{inventory_product, FakeInventory};
    use titan_core::{SaleLineItem, StockUpdateKind};
    use titan_db::{Database, DbConfig};

    fn update(id: &str, quantity: i64) -> StockUpdate {
        StockUpdate {
            inventory_id: id.to_string(),
            quantity,
            kind: StockUpdateKind::Adjustment,
            reason: None,
            reference: None,
        }
    }

    fn pos_product(id: &str, sku: &str, inventory_id: Option<&str>) -> PosProduct {
        PosProduct {
            id: id.to_string(),
            inventory_id: inventory_id.map(str::to_string),
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            description: None,
            price_cents: 100,
            current_stock: 0,
            is_active: true,
            updated_at: Utc::now(),
            last_synced_at: None,
        }
    }

    async fn setup(fake: FakeInventory) -> (Arc<FakeInventory>, Database, StockReconciler) {
        let fake = Arc::new(fake);
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let reconciler = StockReconciler::new(fake.clone(), db.pos_products(), 4, 2);
        (fake, db, reconciler)
    }

    #[tokio::test]
    async fn test_bulk_update_is_per_item_and_ordered() {
        let (fake, _db, reconciler) = setup(
            FakeInventory::new()
                .with_product(inventory_product("A", "SKU-A", 10, 100))
                .with_product(inventory_product("C", "SKU-C", 5, 100)),
        )
        .await;

        let updates = vec![update("A", -2), update("B", -1), update("C", 3)];
        let bulk = reconciler.apply_updates(&updates).await;

        assert_eq!(bulk.results.len(), updates.len());
        assert_eq!(bulk.summary.success_count, 2);
        assert_eq!(bulk.summary.failed_count, 1);
        assert_eq!(bulk.results[0].inventory_id, "A");
        assert_eq!(bulk.results[0].new_quantity, Some(8));
        assert!(!bulk.results[1].success);
        assert!(bulk.results[1].error.as_deref().unwrap().contains("not found"));
        assert_eq!(bulk.results[2].applied_delta, 3);
        assert_eq!(fake.product("C").unwrap().stock_quantity, 8);
    }

    #[tokio::test]
    async fn test_invalid_updates_fail_without_remote_call() {
        let (fake, _db, reconciler) =
            setup(FakeInventory::new().with_product(inventory_product("A", "SKU-A", 10, 100))).await;

        let bulk = reconciler
            .apply_updates(&[update("", -1), update("A", 0), update("A", -11)])
            .await;

        assert_eq!(bulk.summary.failed_count, 3);
        // Only the insufficient-stock item reached the inventory system
        assert_eq!(fake.adjust_calls(), 1);
        assert_eq!(fake.product("A").unwrap().stock_quantity, 10);
    }

    #[tokio::test]
    async fn test_bulk_update_mirrors_into_pos_cache() {
        let (_fake, db, reconciler) =
            setup(FakeInventory::new().with_product(inventory_product("A", "SKU-A", 10, 100))).await;
        db.pos_products()
            .insert(&pos_product("p1", "SKU-A", Some("A")))
            .await
            .unwrap();

        reconciler.apply_updates(&[update("A", -4)]).await;
        assert_eq!(db.pos_products().get("p1").await.unwrap().current_stock, 6);
    }

    #[tokio::test]
    async fn test_reconcile_links_imports_and_applies_authority() {
        let mut renamed = inventory_product("A", "SKU-A", 42, 250);
        renamed.name = "Inventory Name".to_string();
        let (fake, db, reconciler) = setup(
            FakeInventory::new()
                .with_product(renamed)
                .with_product(inventory_product("B", "SKU-B", 7, 99))
                .with_product(inventory_product("C", "SKU-C", 1, 10)),
        )
        .await;
        let repo = db.pos_products();
        let mut local = pos_product("p1", "SKU-A", None);
        local.name = "POS Name".to_string();
        repo.insert(&local).await.unwrap();

        // Page size 2 forces a second catalog page
        let items = reconciler.reconcile_products(None).await;
        let outcome = summarize(&items);
        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.failed(), 0);

        // Linked by SKU, inventory-owned values pulled
        let p1 = repo.get("p1").await.unwrap();
        assert_eq!(p1.inventory_id.as_deref(), Some("A"));
        assert_eq!(p1.current_stock, 42);
        assert_eq!(p1.price_cents, 250);
        assert_eq!(p1.name, "POS Name");

        // POS-owned name pushed to inventory
        assert_eq!(fake.product("A").unwrap().name, "POS Name");
        assert_eq!(fake.patches().len(), 1);

        // Unknown products imported
        assert!(repo.find_by_inventory_id("B").await.unwrap().is_some());
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_subset_reports_item_failures() {
        let (fake, _db, reconciler) = setup(
            FakeInventory::new()
                .with_product(inventory_product("A", "SKU-A", 1, 1))
                .with_product(inventory_product("B", "SKU-B", 1, 1)),
        )
        .await;
        fake.fail_item("B");

        let ids = vec!["A".to_string(), "B".to_string(), "Z".to_string()];
        let outcome = summarize(&reconciler.reconcile_products(Some(&ids)).await);

        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed_items, vec!["B".to_string(), "Z".to_string()]);
        assert!(outcome.error_message.unwrap().starts_with("2 items failed"));
    }

    #[tokio::test]
    async fn test_catalog_listing_failure_is_one_item() {
        let (fake, _db, reconciler) = setup(FakeInventory::new()).await;
        fake.set_online(false);

        let outcome = summarize(&reconciler.reconcile_products(None).await);
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.failed_items, vec![entity::ALL.to_string()]);
    }

    #[tokio::test]
    async fn test_apply_sale_resolves_links_per_line() {
        let (fake, db, reconciler) = setup(
            FakeInventory::new()
                .with_product(inventory_product("A", "SKU-A", 10, 100))
                .with_product(inventory_product("C", "SKU-C", 10, 100)),
        )
        .await;
        let repo = db.pos_products();
        repo.insert(&pos_product("p1", "SKU-A", Some("A"))).await.unwrap();
        repo.insert(&pos_product("p2", "SKU-B", None)).await.unwrap();
        repo.insert(&pos_product("p3", "SKU-C", Some("C"))).await.unwrap();

        let line = |id: &str, quantity: i64, refund: bool| SaleLineItem {
            product_id: id.to_string(),
            quantity,
            refund,
        };
        let sale = SaleData {
            sale_id: "S-7".to_string(),
            receipt_number: None,
            items: vec![
                line("p1", 2, false),
                line("p2", 1, false),
                line("ghost", 1, false),
                line("p3", 4, true),
            ],
        };

        let items = reconciler.apply_sale(&sale).await.unwrap();
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["p1", "p2", "ghost", "p3"]);
        assert!(items[0].error.is_none());
        assert!(items[1].error.as_deref().unwrap().contains("not linked"));
        assert!(items[2].error.as_deref().unwrap().contains("not found"));
        assert!(items[3].error.is_none());
        assert_eq!(fake.product("A").unwrap().stock_quantity, 8);
        assert_eq!(fake.product("C").unwrap().stock_quantity, 14);

        // Linking p2 later makes the same line go through
        fake.add_product(inventory_product("B", "SKU-B", 5, 100));
        repo.link("p2", "B").await.unwrap();
        let retry = SaleData {
            items: vec![line("p2", 1, false)],
            ..sale
        };
        let items = reconciler.apply_sale(&retry).await.unwrap();
        assert_eq!(items, vec![ItemResult::ok("p2")]);
        assert_eq!(fake.product("B").unwrap().stock_quantity, 4);
    }

    #[tokio::test]
    async fn test_batches_run_on_spawned_tasks() {
        let (_fake, _db, reconciler) =
            setup(FakeInventory::new().with_product(inventory_product("A", "SKU-A", 10, 100))).await;

        let worker = reconciler.clone();
        let bulk = tokio::spawn(async move { worker.apply_updates(&[update("A", -1)]).await })
            .await
            .unwrap();
        assert_eq!(bulk.summary.success_count, 1);

        let worker = reconciler.clone();
        let items = tokio::spawn(async move {
            let ids = vec!["A".to_string()];
            worker.reconcile_products(Some(&ids)).await
        })
        .await
        .unwrap();
        assert_eq!(summarize(&items).succeeded, 1);
    }

    #[tokio::test]
    async fn test_pull_stock() {
        let (_fake, db, reconciler) =
            setup(FakeInventory::new().with_product(inventory_product("A", "SKU-A", 17, 100))).await;
        let repo = db.pos_products();
        repo.insert(&pos_product("p1", "SKU-A", Some("A"))).await.unwrap();
        repo.insert(&pos_product("p2", "SKU-X", None)).await.unwrap();

        let all = summarize(&reconciler.pull_stock(&[]).await.unwrap());
        assert_eq!(all.processed, 1);
        assert_eq!(repo.get("p1").await.unwrap().current_stock, 17);

        let ids = vec!["p1".to_string(), "p2".to_string(), "missing".to_string()];
        let scoped = summarize(&reconciler.pull_stock(&ids).await.unwrap());
        assert_eq!(scoped.succeeded, 1);
        assert_eq!(scoped.failed_items, vec!["p2".to_string(), "missing".to_string()]);
    }
}
