//! In-process inventory system for engine tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

use crate::client::{InventoryClient, InventoryResult, StockAdjustment};
use crate::error::InventoryError;
use titan_core::{
    InventoryInfo, InventoryProduct, ProductPatch, ProductQuery, ProductVariant, StockLevel,
    StockUpdate, Warehouse,
};

pub fn inventory_product(id: &str, sku: &str, stock: i64, price_cents: i64) -> InventoryProduct {
    InventoryProduct {
        id: id.to_string(),
        sku: sku.to_string(),
        name: format!("Product {sku}"),
        description: None,
        price_cents,
        stock_quantity: stock,
        is_active: true,
        updated_at: None,
    }
}

/// Fake inventory with switchable connectivity, injectable item failures and
/// a gate that parks health checks so a cycle can be held in flight.
#[derive(Default)]
pub struct FakeInventory {
    offline: AtomicBool,
    health_delay: Mutex<Duration>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
    products: Mutex<BTreeMap<String, InventoryProduct>>,
    failing: Mutex<HashSet<String>>,
    patches: Mutex<Vec<(String, ProductPatch)>>,
    adjust_calls: AtomicUsize,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(self, product: InventoryProduct) -> Self {
        self.add_product(product);
        self
    }

    pub fn add_product(&self, product: InventoryProduct) {
        self.products
            .lock()
            .unwrap()
            .insert(product.id.clone(), product);
    }

    pub fn product(&self, id: &str) -> Option<InventoryProduct> {
        self.products.lock().unwrap().get(id).cloned()
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn set_health_delay(&self, delay: Duration) {
        *self.health_delay.lock().unwrap() = delay;
    }

    /// Every call touching `id` fails with a transport error.
    pub fn fail_item(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn heal_item(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    pub fn patches(&self) -> Vec<(String, ProductPatch)> {
        self.patches.lock().unwrap().clone()
    }

    pub fn adjust_calls(&self) -> usize {
        self.adjust_calls.load(Ordering::SeqCst)
    }

    /// Parks every following health check until [`release`](Self::release).
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Waits until a health check is parked on the gate.
    pub async fn wait_until_held(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    fn check_online(&self) -> InventoryResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(InventoryError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_item(&self, id: &str) -> InventoryResult<()> {
        self.check_online()?;
        if self.failing.lock().unwrap().contains(id) {
            return Err(InventoryError::Transport(format!("injected failure for {id}")));
        }
        Ok(())
    }

    fn find(&self, id: &str) -> InventoryResult<InventoryProduct> {
        self.product(id)
            .ok_or_else(|| InventoryError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl InventoryClient for FakeInventory {
    async fn health(&self) -> InventoryResult<()> {
        let delay = *self.health_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _permit = gate.acquire().await;
        }

        self.check_online()
    }

    async fn info(&self) -> InventoryResult<InventoryInfo> {
        self.check_online()?;
        Ok(InventoryInfo {
            name: "Fake Inventory".to_string(),
            version: "1.0.0".to_string(),
            product_count: self.products.lock().unwrap().len() as i64,
            warehouse_count: 1,
        })
    }

    async fn list_products(&self, query: &ProductQuery) -> InventoryResult<Vec<InventoryProduct>> {
        self.check_online()?;
        let products = self.products.lock().unwrap();
        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.unwrap_or(50).max(0) as usize;
        Ok(products
            .values()
            .filter(|p| match &query.search {
                Some(term) => p.sku.contains(term.as_str()) || p.name.contains(term.as_str()),
                None => true,
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_product(&self, inventory_id: &str) -> InventoryResult<InventoryProduct> {
        self.check_item(inventory_id)?;
        self.find(inventory_id)
    }

    async fn get_stock(&self, inventory_id: &str) -> InventoryResult<StockLevel> {
        self.check_item(inventory_id)?;
        let product = self.find(inventory_id)?;
        Ok(StockLevel {
            inventory_id: product.id,
            quantity: product.stock_quantity,
            warehouse_id: Some("WH-1".to_string()),
            updated_at: None,
        })
    }

    async fn adjust_stock(&self, update: &StockUpdate) -> InventoryResult<StockAdjustment> {
        self.adjust_calls.fetch_add(1, Ordering::SeqCst);
        self.check_item(&update.inventory_id)?;

        let mut products = self.products.lock().unwrap();
        let product = products
            .get_mut(&update.inventory_id)
            .ok_or_else(|| InventoryError::NotFound(update.inventory_id.clone()))?;

        let previous = product.stock_quantity;
        let new = previous + update.quantity;
        if new < 0 {
            return Err(InventoryError::InsufficientStock(update.inventory_id.clone()));
        }
        product.stock_quantity = new;

        Ok(StockAdjustment {
            previous_quantity: previous,
            new_quantity: new,
        })
    }

    async fn update_product_details(
        &self,
        inventory_id: &str,
        patch: &ProductPatch,
    ) -> InventoryResult<InventoryProduct> {
        self.check_item(inventory_id)?;

        let updated = {
            let mut products = self.products.lock().unwrap();
            let product = products
                .get_mut(inventory_id)
                .ok_or_else(|| InventoryError::NotFound(inventory_id.to_string()))?;
            if let Some(name) = &patch.name {
                product.name = name.clone();
            }
            if let Some(description) = &patch.description {
                product.description = Some(description.clone()).filter(|d| !d.is_empty());
            }
            if let Some(active) = patch.is_active {
                product.is_active = active;
            }
            product.clone()
        };

        self.patches
            .lock()
            .unwrap()
            .push((inventory_id.to_string(), patch.clone()));
        Ok(updated)
    }

    async fn get_variants(&self, inventory_id: &str) -> InventoryResult<Vec<ProductVariant>> {
        self.check_item(inventory_id)?;
        let product = self.find(inventory_id)?;
        Ok(vec![ProductVariant {
            id: format!("{}-V1", product.id),
            product_id: product.id,
            sku: format!("{}-V1", product.sku),
            name: product.name,
            price_cents: product.price_cents,
            stock_quantity: product.stock_quantity,
        }])
    }

    async fn get_warehouses(&self) -> InventoryResult<Vec<Warehouse>> {
        self.check_online()?;
        Ok(vec![Warehouse {
            id: "WH-1".to_string(),
            name: "Main Warehouse".to_string(),
            code: Some("MAIN".to_string()),
            is_active: true,
        }])
    }
}
