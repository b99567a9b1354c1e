//! # Sync Coordinator
//!
//! Orchestrates every synchronization cycle and owns the engine settings.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  trigger (timer tick, sale, manual request)                             │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  1. enabled?            no ──► SyncOutcome::noop                        │
//! │  2. single-flight flag  taken ──► SyncError::AlreadySyncing             │
//! │  3. probe               down ──► SyncError::ConnectionFailed            │
//! │                                  (no record written)                    │
//! │  4. create pending record(s)                                            │
//! │  5. StockReconciler does the per-item work                              │
//! │  6. finish record(s): success / partial / failed (+ next_retry_at)      │
//! │  7. persist last_sync                                                   │
//! │  8. release flag (CycleGuard drop)                                      │
//! │  9. publish *_completed                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timer
//! One background task sleeps for the current interval, runs a products
//! cycle, then retries due records. The interval is re-read before every
//! sleep. `stop()` only prevents future ticks.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::InventoryClient;
use crate::config::BridgeConfig;
use crate::error::{SyncError, SyncResult};
use crate::notifier::{EventNotifier, SyncEvent};
use crate::probe::{ConnectionProbe, ConnectionStatus};
use crate::reconciler::{bulk_items, summarize, ItemResult, StockReconciler};
use crate::retry::{RetryPolicy, RetryScheduler};
use titan_core::validation::validate_sale_data;
use titan_core::{
    entity, AttemptOutcome, BulkUpdateResult, InventoryInfo, InventoryProduct, NewSyncRecord,
    ProductQuery, ProductVariant, SaleData, StockLevel, StockUpdate, StockUpdateResult,
    SyncContext, SyncDirection, SyncOutcome, SyncPayload, SyncRecord, SyncSetting, SyncSettings,
    SyncStats, SyncType, ValidationError, Warehouse, MIN_TICK_INTERVAL_MS,
};
use titan_db::{Database, HistoryFilter, PosProductRepository, SettingsRepository, SyncRecordRepository};

// =============================================================================
// Status & Option Types
// =============================================================================

/// Snapshot returned by `getStatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub is_syncing: bool,
    pub timer_running: bool,
    #[serde(flatten)]
    pub settings: SyncSettings,
}

/// `getDetailedStatus`: status plus a live probe and record counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedStatus {
    #[serde(flatten)]
    pub status: EngineStatus,
    pub connection: ConnectionStatus,
    pub stats: SyncStats,
    pub pending_count: usize,
}

/// `getFullConfig`: settings plus the static engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullConfig {
    pub settings: SyncSettings,
    pub inventory_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: i64,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub retention_days: u32,
    pub stale_pending_secs: u64,
    pub max_concurrency: usize,
    pub page_size: i64,
    pub min_tick_interval_ms: u64,
}

/// What a manual cycle covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSyncOptions {
    #[serde(default = "default_true")]
    pub include_products: bool,
    #[serde(default = "default_true")]
    pub include_stock: bool,
    /// POS product ids for the stock unit. Empty means all linked products.
    #[serde(default)]
    pub product_ids: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ManualSyncOptions {
    fn default() -> Self {
        ManualSyncOptions {
            include_products: true,
            include_stock: true,
            product_ids: Vec::new(),
        }
    }
}

/// `bulkUpdateStock` answer: `{results, summary, record}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkStockOutcome {
    #[serde(flatten)]
    pub result: BulkUpdateResult,
    pub record: SyncRecord,
}

/// `updateProductStock` answer: `{result, record}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockUpdateOutcome {
    pub result: StockUpdateResult,
    pub record: SyncRecord,
}

/// `cleanupSyncData` answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: u64,
    pub recovered: u64,
}

// =============================================================================
// Single-Flight Guard
// =============================================================================

/// Holds the "is syncing" flag for the lifetime of one cycle.
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Running timer task and its shutdown channel.
struct TimerHandle {
    shutdown_tx: mpsc::Sender<()>,
    _task: JoinHandle<()>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// The engine. Built once at startup and shared behind an `Arc`.
pub struct SyncCoordinator {
    records: SyncRecordRepository,
    settings_repo: SettingsRepository,
    products: PosProductRepository,
    client: Arc<dyn InventoryClient>,
    probe: ConnectionProbe,
    reconciler: StockReconciler,
    scheduler: RetryScheduler,
    notifier: EventNotifier,
    config: BridgeConfig,

    settings: RwLock<SyncSettings>,
    syncing: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
}

impl SyncCoordinator {
    /// Wires the engine and loads persisted settings over the `[sync]`
    /// defaults.
    pub async fn new(
        db: &Database,
        client: Arc<dyn InventoryClient>,
        config: &BridgeConfig,
        notifier: EventNotifier,
    ) -> SyncResult<Self> {
        let settings_repo = db.settings();
        let settings = settings_repo.load(&config.sync.to_settings()).await?;

        let probe = ConnectionProbe::new(client.clone(), config.inventory.connect_timeout());
        let reconciler = StockReconciler::new(
            client.clone(),
            db.pos_products(),
            config.reconciler.max_concurrency,
            config.reconciler.page_size,
        );
        let scheduler = RetryScheduler::new(
            db.sync_records(),
            RetryPolicy::from_config(&config.retry),
        );

        info!(
            enabled = settings.enabled,
            interval_ms = settings.sync_interval_ms,
            "Sync coordinator ready"
        );

        Ok(SyncCoordinator {
            records: db.sync_records(),
            settings_repo,
            products: db.pos_products(),
            client,
            probe,
            reconciler,
            scheduler,
            notifier,
            config: config.clone(),
            settings: RwLock::new(settings),
            syncing: AtomicBool::new(false),
            timer: Mutex::new(None),
        })
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    fn begin(&self) -> SyncResult<CycleGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadySyncing)?;
        Ok(CycleGuard {
            flag: &self.syncing,
        })
    }

    async fn ensure_connected(&self) -> SyncResult<()> {
        let status = self.probe.test().await;
        if status.connected {
            Ok(())
        } else {
            Err(SyncError::ConnectionFailed(status.message))
        }
    }

    async fn is_enabled(&self) -> bool {
        self.settings.read().await.enabled
    }

    // =========================================================================
    // Cycle Plumbing
    // =========================================================================

    /// Creates a pending record, runs `work`, and writes the terminal status.
    ///
    /// A unit whose work fails as a whole is finished as `failed` so it never
    /// lingers in `pending`.
    async fn run_unit<F, Fut>(&self, new: NewSyncRecord, work: F) -> SyncResult<SyncRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<Vec<ItemResult>>>,
    {
        let record = self.records.create(&new).await?;
        let outcome = match work().await {
            Ok(items) => summarize(&items),
            Err(e) => {
                warn!(sync_id = record.id, error = %e, "Sync unit aborted");
                AttemptOutcome::aborted(e.to_string())
            }
        };
        self.finish_attempt(&record, &outcome).await
    }

    async fn finish_attempt(
        &self,
        record: &SyncRecord,
        outcome: &AttemptOutcome,
    ) -> SyncResult<SyncRecord> {
        let next_retry_at =
            self.scheduler
                .policy()
                .next_retry_at(outcome.status(), record.retry_count, Utc::now());
        let finished = self.records.finish(record.id, outcome, next_retry_at).await?;

        info!(
            sync_id = finished.id,
            entity_type = %finished.entity_type,
            status = %finished.status,
            processed = finished.items_processed,
            failed = finished.items_failed,
            "Sync record completed"
        );
        Ok(finished)
    }

    /// Persists `last_sync`, releases the flag, then publishes.
    async fn complete<T: Serialize>(
        &self,
        guard: CycleGuard<'_>,
        event: SyncEvent,
        payload: &T,
    ) -> SyncResult<()> {
        self.touch_last_sync().await?;
        drop(guard);
        self.notifier.publish_json(event, payload);
        Ok(())
    }

    async fn touch_last_sync(&self) -> SyncResult<()> {
        let at = Utc::now();
        let mut settings = self.settings.write().await;
        self.settings_repo.set_last_sync(at).await?;
        settings.last_sync = Some(at);
        Ok(())
    }

    fn stock_record(
        entity_id: String,
        sync_type: SyncType,
        product_ids: Vec<String>,
        context: &SyncContext,
    ) -> NewSyncRecord {
        NewSyncRecord {
            entity_type: entity::STOCK.to_string(),
            entity_id,
            sync_type,
            sync_direction: SyncDirection::InventoryToPos,
            payload: SyncPayload::Stock { product_ids },
            context: context.clone(),
        }
    }

    fn catalog_record(sync_type: SyncType, context: &SyncContext) -> NewSyncRecord {
        NewSyncRecord {
            entity_type: entity::PRODUCT_CATALOG.to_string(),
            entity_id: entity::ALL.to_string(),
            sync_type,
            sync_direction: SyncDirection::InventoryToPos,
            payload: SyncPayload::Products {
                inventory_ids: None,
            },
            context: context.clone(),
        }
    }

    // =========================================================================
    // Cycles
    // =========================================================================

    /// Full cycle: catalog and/or stock pull, one record per unit.
    pub async fn manual_sync(
        &self,
        context: SyncContext,
        options: ManualSyncOptions,
    ) -> SyncResult<SyncOutcome> {
        if !self.is_enabled().await {
            return Ok(SyncOutcome::noop("Synchronization is disabled"));
        }
        let guard = self.begin()?;
        info!(
            products = options.include_products,
            stock = options.include_stock,
            "Manual sync started"
        );
        self.ensure_connected().await?;

        let mut records = Vec::new();
        if options.include_products {
            let record = self
                .run_unit(Self::catalog_record(SyncType::Manual, &context), || async {
                    Ok(self.reconciler.reconcile_products(None).await)
                })
                .await?;
            records.push(record);
        }

        if options.include_stock {
            let ids = options.product_ids;
            let new = Self::stock_record(scope_id(&ids), SyncType::Manual, ids.clone(), &context);
            let record = self
                .run_unit(new, || self.reconciler.pull_stock(&ids))
                .await?;
            records.push(record);
        }

        let outcome = SyncOutcome::from_records(records);
        info!(
            processed = outcome.summary.processed,
            failed = outcome.summary.failed,
            "Manual sync finished"
        );
        self.complete(guard, SyncEvent::ManualCompleted, &outcome).await?;
        Ok(outcome)
    }

    /// Catalog reconciliation cycle.
    pub async fn sync_products(&self, context: SyncContext) -> SyncResult<SyncOutcome> {
        if !self.is_enabled().await {
            return Ok(SyncOutcome::noop("Synchronization is disabled"));
        }
        let guard = self.begin()?;
        debug!("Product sync started");
        self.ensure_connected().await?;

        let record = self
            .run_unit(Self::catalog_record(SyncType::Products, &context), || async {
                Ok(self.reconciler.reconcile_products(None).await)
            })
            .await?;

        let outcome = SyncOutcome::from_records(vec![record]);
        self.complete(guard, SyncEvent::ProductsCompleted, &outcome).await?;
        Ok(outcome)
    }

    /// Pulls inventory stock into the POS cache. Empty ids means every
    /// linked product.
    pub async fn sync_stock(
        &self,
        product_ids: Vec<String>,
        context: SyncContext,
    ) -> SyncResult<SyncOutcome> {
        if !self.is_enabled().await {
            return Ok(SyncOutcome::noop("Synchronization is disabled"));
        }
        let guard = self.begin()?;
        debug!(count = product_ids.len(), "Stock sync started");
        self.ensure_connected().await?;

        let new = Self::stock_record(
            scope_id(&product_ids),
            SyncType::Stock,
            product_ids.clone(),
            &context,
        );
        let record = self
            .run_unit(new, || self.reconciler.pull_stock(&product_ids))
            .await?;

        let outcome = SyncOutcome::from_records(vec![record]);
        self.complete(guard, SyncEvent::StockCompleted, &outcome).await?;
        Ok(outcome)
    }

    /// Pushes the stock movements of a completed sale.
    ///
    /// Lines whose POS product has no inventory link fail individually.
    pub async fn update_stock_from_sale(
        &self,
        sale: SaleData,
        context: SyncContext,
    ) -> SyncResult<SyncOutcome> {
        validate_sale_data(&sale)?;
        {
            let settings = self.settings.read().await;
            if !settings.enabled {
                return Ok(SyncOutcome::noop("Synchronization is disabled"));
            }
            if !settings.auto_update_on_sale {
                return Ok(SyncOutcome::noop("Automatic stock update on sale is disabled"));
            }
        }
        let guard = self.begin()?;
        info!(sale_id = %sale.sale_id, lines = sale.items.len(), "Sale stock update started");
        self.ensure_connected().await?;

        let new = NewSyncRecord {
            entity_type: entity::SALE.to_string(),
            entity_id: sale.sale_id.clone(),
            sync_type: SyncType::SaleTriggered,
            sync_direction: SyncDirection::PosToInventory,
            payload: SyncPayload::Sale { sale: sale.clone() },
            context,
        };
        let record = self
            .run_unit(new, || self.reconciler.apply_sale(&sale))
            .await?;

        let outcome = SyncOutcome::from_records(vec![record]);
        self.complete(guard, SyncEvent::StockCompleted, &outcome).await?;
        Ok(outcome)
    }

    /// Applies stock deltas item by item and records the batch.
    ///
    /// An explicit mutation, so it runs even while automatic sync is
    /// disabled.
    pub async fn bulk_update_stock(
        &self,
        updates: Vec<StockUpdate>,
        context: SyncContext,
    ) -> SyncResult<BulkStockOutcome> {
        if updates.is_empty() {
            return Err(ValidationError::Required {
                field: "updates".to_string(),
            }
            .into());
        }
        let guard = self.begin()?;
        debug!(count = updates.len(), "Bulk stock update started");
        self.ensure_connected().await?;

        let new = NewSyncRecord {
            entity_type: entity::STOCK_BATCH.to_string(),
            entity_id: Uuid::new_v4().to_string(),
            sync_type: SyncType::Stock,
            sync_direction: SyncDirection::PosToInventory,
            payload: SyncPayload::StockUpdates {
                updates: updates.clone(),
            },
            context,
        };
        let record = self.records.create(&new).await?;
        let result = self.reconciler.apply_updates(&updates).await;
        let record = self
            .finish_attempt(&record, &summarize(&bulk_items(&result)))
            .await?;

        let outcome = BulkStockOutcome { result, record };
        self.complete(guard, SyncEvent::StockCompleted, &outcome).await?;
        Ok(outcome)
    }

    /// Single-item [`bulk_update_stock`](Self::bulk_update_stock).
    pub async fn update_product_stock(
        &self,
        update: StockUpdate,
        context: SyncContext,
    ) -> SyncResult<StockUpdateOutcome> {
        let BulkStockOutcome { result, record } =
            self.bulk_update_stock(vec![update], context).await?;
        let result = result
            .results
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Internal("bulk update returned no result".to_string()))?;
        Ok(StockUpdateOutcome { result, record })
    }

    // =========================================================================
    // Retries
    // =========================================================================

    /// Re-runs one failed/partial record now, ignoring its schedule.
    pub async fn force_retry(&self, sync_id: i64) -> SyncResult<SyncOutcome> {
        let guard = self.begin()?;
        let record = self.scheduler.load_for_force_retry(sync_id).await?;
        info!(sync_id, retry_count = record.retry_count, "Forced retry started");
        self.ensure_connected().await?;

        let record = self.retry_record(record).await?;
        let event = completion_event(record.sync_type);
        let outcome = SyncOutcome::from_records(vec![record]);
        self.complete(guard, event, &outcome).await?;
        Ok(outcome)
    }

    /// Runs every due record, one after another, under one lock and probe.
    pub async fn retry_pending_syncs(&self) -> SyncResult<SyncOutcome> {
        if !self.is_enabled().await {
            return Ok(SyncOutcome::noop("Synchronization is disabled"));
        }
        let guard = self.begin()?;
        let due = self.scheduler.due(Utc::now()).await?;
        if due.is_empty() {
            return Ok(SyncOutcome::noop("No sync records due for retry"));
        }
        info!(count = due.len(), "Retrying due sync records");
        self.ensure_connected().await?;

        let mut records = Vec::with_capacity(due.len());
        for record in due {
            let sync_id = record.id;
            match self.retry_record(record).await {
                Ok(record) => records.push(record),
                Err(e) => error!(sync_id, ?e, "Retry of sync record failed, continuing"),
            }
        }

        let mut events: Vec<SyncEvent> = Vec::new();
        for event in records.iter().map(|r| completion_event(r.sync_type)) {
            if !events.contains(&event) {
                events.push(event);
            }
        }
        let outcome = SyncOutcome::from_records(records);
        self.touch_last_sync().await?;
        drop(guard);
        for event in events {
            self.notifier.publish_json(event, &outcome);
        }
        Ok(outcome)
    }

    /// Re-executes a record in place.
    ///
    /// Only the failed items run again and their results are merged into
    /// the record's counters. Records with no usable failed-item list
    /// (interrupted, or a failed catalog listing) re-run their whole payload
    /// and take the new counters as they are.
    async fn retry_record(&self, record: SyncRecord) -> SyncResult<SyncRecord> {
        let full_run = record.failed_items.is_empty()
            || record.failed_items.iter().any(|key| key == entity::ALL);
        let payload = if full_run {
            record.payload.clone()
        } else {
            record.payload.restrict_to(&record.failed_items)
        };

        let retrying = self.records.begin_retry(record.id).await?;
        debug!(
            sync_id = retrying.id,
            retry_count = retrying.retry_count,
            full_run,
            "Sync record retry attempt"
        );

        let outcome = match self.execute(&payload).await {
            Ok(items) if full_run => summarize(&items),
            Ok(items) => {
                let attempt = summarize(&items);
                merge_retry(&record, &items, attempt)
            }
            Err(e) => {
                warn!(sync_id = record.id, error = %e, "Sync record retry aborted");
                if full_run {
                    AttemptOutcome::aborted(e.to_string())
                } else {
                    // Nothing re-ran, the earlier counters stand
                    AttemptOutcome {
                        processed: record.items_processed,
                        succeeded: record.items_succeeded,
                        failed_items: record.failed_items.clone(),
                        error_message: Some(e.to_string()),
                    }
                }
            }
        };

        self.finish_attempt(&retrying, &outcome).await
    }

    async fn execute(&self, payload: &SyncPayload) -> SyncResult<Vec<ItemResult>> {
        match payload {
            SyncPayload::Products { inventory_ids } => Ok(self
                .reconciler
                .reconcile_products(inventory_ids.as_deref())
                .await),
            SyncPayload::Stock { product_ids } => self.reconciler.pull_stock(product_ids).await,
            SyncPayload::StockUpdates { updates } => {
                Ok(bulk_items(&self.reconciler.apply_updates(updates).await))
            }
            SyncPayload::Sale { sale } => self.reconciler.apply_sale(sale).await,
        }
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    pub async fn reset_failed_syncs(&self, entity_type: Option<&str>) -> SyncResult<u64> {
        self.scheduler.reset_failed(entity_type).await
    }

    pub async fn clean_old_records(&self, days_to_keep: u32) -> SyncResult<u64> {
        self.scheduler.clean_old_records(days_to_keep).await
    }

    /// Fails `pending` records older than the staleness threshold.
    pub async fn recover_interrupted(&self) -> SyncResult<u64> {
        self.scheduler
            .recover_interrupted(Duration::from_secs(self.config.retry.stale_pending_secs))
            .await
    }

    /// Purge with the given (or configured) retention, then recover
    /// interrupted records.
    pub async fn cleanup_sync_data(&self, days_to_keep: Option<u32>) -> SyncResult<CleanupReport> {
        let days = days_to_keep.unwrap_or(self.config.retry.retention_days);
        let removed = self.clean_old_records(days).await?;
        let recovered = self.recover_interrupted().await?;
        Ok(CleanupReport { removed, recovered })
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub async fn settings(&self) -> SyncSettings {
        self.settings.read().await.clone()
    }

    /// Validates, persists and applies one setting, then publishes
    /// `config_updated`. On error the previous value stays.
    pub async fn update_setting(&self, setting: SyncSetting) -> SyncResult<SyncSettings> {
        let updated = {
            let mut current = self.settings.write().await;
            let mut next = current.clone();
            next.apply(&setting)?;
            self.settings_repo.save(&next).await?;
            *current = next.clone();
            next
        };

        info!(key = setting.key(), value = %setting.value(), "Sync setting updated");
        self.notifier.publish(
            SyncEvent::ConfigUpdated,
            json!({ "key": setting.key(), "value": setting.value() }),
        );
        Ok(updated)
    }

    pub async fn set_enabled(&self, enabled: bool) -> SyncResult<SyncSettings> {
        self.update_setting(SyncSetting::Enabled(enabled)).await
    }

    pub async fn set_auto_update_on_sale(&self, enabled: bool) -> SyncResult<SyncSettings> {
        self.update_setting(SyncSetting::AutoUpdateOnSale(enabled)).await
    }

    pub async fn set_sync_interval(&self, interval_ms: i64) -> SyncResult<SyncSettings> {
        self.update_setting(SyncSetting::SyncInterval(interval_ms)).await
    }

    /// Persists the configured defaults if no settings were stored yet,
    /// otherwise reloads the stored ones.
    pub async fn initialize_settings(&self) -> SyncResult<SyncSettings> {
        let settings = {
            let mut current = self.settings.write().await;
            let defaults = self.config.sync.to_settings();
            let settings = if self.settings_repo.is_initialized().await? {
                self.settings_repo.load(&defaults).await?
            } else {
                self.settings_repo.save(&defaults).await?;
                info!("Sync settings initialized from defaults");
                defaults
            };
            *current = settings.clone();
            settings
        };

        self.notifier.publish_json(
            SyncEvent::ConfigUpdated,
            &json!({ "key": "initialized", "value": &settings }),
        );
        Ok(settings)
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            is_syncing: self.is_syncing(),
            timer_running: self.is_timer_running(),
            settings: self.settings().await,
        }
    }

    pub async fn detailed_status(&self) -> SyncResult<DetailedStatus> {
        let status = self.status().await;
        let connection = self.probe.test().await;
        let stats = self.stats().await?;
        let pending_count = self.scheduler.pending().await?.len();
        Ok(DetailedStatus {
            status,
            connection,
            stats,
            pending_count,
        })
    }

    pub async fn full_config(&self) -> FullConfig {
        let config = &self.config;
        FullConfig {
            settings: self.settings().await,
            inventory_url: config.inventory.base_url.clone(),
            connect_timeout_secs: config.inventory.connect_timeout_secs,
            request_timeout_secs: config.inventory.request_timeout_secs,
            max_retries: config.retry.max_retries,
            initial_backoff_ms: config.retry.initial_backoff_ms,
            max_backoff_secs: config.retry.max_backoff_secs,
            retention_days: config.retry.retention_days,
            stale_pending_secs: config.retry.stale_pending_secs,
            max_concurrency: config.reconciler.max_concurrency,
            page_size: config.reconciler.page_size,
            min_tick_interval_ms: MIN_TICK_INTERVAL_MS,
        }
    }

    // =========================================================================
    // Record Queries
    // =========================================================================

    pub async fn history(&self, filter: &HistoryFilter) -> SyncResult<Vec<SyncRecord>> {
        Ok(self.records.history(filter).await?)
    }

    pub async fn stats(&self) -> SyncResult<SyncStats> {
        Ok(self.records.stats(self.scheduler.policy().max_retries).await?)
    }

    pub async fn pending_syncs(&self) -> SyncResult<Vec<SyncRecord>> {
        self.scheduler.pending().await
    }

    pub async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
    ) -> SyncResult<Vec<SyncRecord>> {
        Ok(self
            .records
            .entity_history(entity_type, entity_id, limit)
            .await?)
    }

    // =========================================================================
    // Inventory Passthrough
    // =========================================================================

    pub async fn test_connection(&self) -> ConnectionStatus {
        self.probe.test().await
    }

    pub async fn inventory_info(&self) -> SyncResult<InventoryInfo> {
        Ok(self.client.info().await?)
    }

    pub async fn inventory_products(&self, query: &ProductQuery) -> SyncResult<Vec<InventoryProduct>> {
        Ok(self.client.list_products(query).await?)
    }

    pub async fn product_stock(&self, inventory_id: &str) -> SyncResult<StockLevel> {
        Ok(self.client.get_stock(inventory_id).await?)
    }

    pub async fn product_variants(&self, inventory_id: &str) -> SyncResult<Vec<ProductVariant>> {
        Ok(self.client.get_variants(inventory_id).await?)
    }

    pub async fn warehouses(&self) -> SyncResult<Vec<Warehouse>> {
        Ok(self.client.get_warehouses().await?)
    }

    // =========================================================================
    // Periodic Timer
    // =========================================================================

    pub fn is_timer_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Arms the periodic timer. Returns false if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_timer(Arc::downgrade(self), shutdown_rx));
        *slot = Some(TimerHandle {
            shutdown_tx,
            _task: task,
        });
        info!("Sync timer started");
        true
    }

    /// Disarms the timer. An in-flight cycle runs to completion.
    /// Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => {
                let _ = handle.shutdown_tx.try_send(());
                info!("Sync timer stopped");
                true
            }
            None => false,
        }
    }

    async fn tick_period(&self) -> Duration {
        let interval_ms = self.settings.read().await.sync_interval_ms;
        Duration::from_millis(interval_ms.max(MIN_TICK_INTERVAL_MS))
    }

    /// One timer tick: products cycle, then due retries.
    async fn run_tick(&self) {
        match self.sync_products(SyncContext::system()).await {
            Ok(outcome) => debug!(message = %outcome.message, "Scheduled product sync finished"),
            Err(SyncError::AlreadySyncing) => {
                debug!("Skipping scheduled sync, another cycle is running");
                return;
            }
            Err(e) => log_tick_failure("product sync", &e),
        }

        match self.retry_pending_syncs().await {
            Ok(outcome) => debug!(message = %outcome.message, "Scheduled retry pass finished"),
            Err(SyncError::AlreadySyncing) => debug!("Skipping retry pass, another cycle is running"),
            Err(e) => log_tick_failure("retry pass", &e),
        }
    }
}

/// Transient failures are retried by the next tick. Anything else needs an
/// operator.
fn log_tick_failure(stage: &str, e: &SyncError) {
    if e.is_retryable() {
        warn!(stage, error = %e, "Scheduled cycle failed, next tick will try again");
    } else if e.is_config_error() {
        error!(stage, error = %e, "Scheduled cycle failed on configuration, check the bridge config");
    } else {
        error!(stage, error = %e, "Scheduled cycle failed");
    }
}

/// Timer loop. Holds only a weak reference so dropping the coordinator
/// ends it.
async fn run_timer(coordinator: Weak<SyncCoordinator>, mut shutdown_rx: mpsc::Receiver<()>) {
    loop {
        let period = match coordinator.upgrade() {
            Some(c) => c.tick_period().await,
            None => break,
        };

        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Sync timer received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(period) => {}
        }

        match coordinator.upgrade() {
            Some(c) => c.run_tick().await,
            None => break,
        }
    }
    warn!("Sync timer exited");
}

/// Event published when a record of this type finishes.
fn completion_event(sync_type: SyncType) -> SyncEvent {
    match sync_type {
        SyncType::Manual => SyncEvent::ManualCompleted,
        SyncType::Products => SyncEvent::ProductsCompleted,
        SyncType::Stock | SyncType::SaleTriggered => SyncEvent::StockCompleted,
    }
}

/// `entity_id` of a stock record: "all" or the comma-joined scope.
fn scope_id(product_ids: &[String]) -> String {
    if product_ids.is_empty() {
        entity::ALL.to_string()
    } else {
        product_ids.join(",")
    }
}

/// Folds a subset retry into the record's counters.
///
/// Processed stays as it was. Succeeded grows by the newly succeeded items.
/// Failed becomes the items still failing, including previously failed keys
/// the retry could not re-run.
fn merge_retry(record: &SyncRecord, items: &[ItemResult], attempt: AttemptOutcome) -> AttemptOutcome {
    let mut carried: Vec<String> = record.failed_items.clone();
    for item in items {
        if let Some(idx) = carried.iter().position(|key| *key == item.key) {
            carried.swap_remove(idx);
        }
    }

    let mut failed_items = attempt.failed_items;
    failed_items.extend(carried);

    let error_message = match attempt.error_message {
        Some(message) => Some(message),
        None if !failed_items.is_empty() => record.error_message.clone(),
        None => None,
    };

    AttemptOutcome {
        processed: record.items_processed,
        succeeded: record.items_succeeded + attempt.succeeded,
        failed_items,
        error_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{inventory_product, FakeInventory};
    use serde_json::Value;
    use titan_core::{PosProduct, SaleLineItem, StockUpdateKind, SyncStatus};
    use titan_db::DbConfig;

    struct Harness {
        fake: Arc<FakeInventory>,
        db: Database,
        coordinator: Arc<SyncCoordinator>,
        events: Arc<Mutex<Vec<(SyncEvent, Value)>>>,
        _subs: Vec<crate::notifier::Subscription>,
    }

    async fn harness_with(fake: FakeInventory, config: BridgeConfig) -> Harness {
        let fake = Arc::new(fake);
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let notifier = EventNotifier::new();

        let events = Arc::new(Mutex::new(Vec::new()));
        let subs = SyncEvent::ALL
            .iter()
            .map(|&event| {
                let events = events.clone();
                notifier.subscribe(event, move |payload| {
                    events.lock().unwrap().push((event, payload.clone()))
                })
            })
            .collect();

        let coordinator = SyncCoordinator::new(&db, fake.clone(), &config, notifier)
            .await
            .unwrap();
        Harness {
            fake,
            db,
            coordinator: Arc::new(coordinator),
            events,
            _subs: subs,
        }
    }

    async fn harness() -> Harness {
        harness_with(
            FakeInventory::new()
                .with_product(inventory_product("A", "SKU-A", 10, 100))
                .with_product(inventory_product("C", "SKU-C", 10, 100)),
            BridgeConfig::default(),
        )
        .await
    }

    impl Harness {
        fn events_of(&self, event: SyncEvent) -> Vec<Value> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(e, _)| *e == event)
                .map(|(_, v)| v.clone())
                .collect()
        }

        async fn record_count(&self) -> i64 {
            self.db.sync_records().count().await.unwrap()
        }

        async fn link(&self, pos_id: &str, sku: &str, inventory_id: Option<&str>) {
            self.db
                .pos_products()
                .insert(&PosProduct {
                    id: pos_id.to_string(),
                    inventory_id: inventory_id.map(str::to_string),
                    sku: sku.to_string(),
                    name: format!("Product {sku}"),
                    description: None,
                    price_cents: 100,
                    current_stock: 0,
                    is_active: true,
                    updated_at: Utc::now(),
                    last_synced_at: None,
                })
                .await
                .unwrap();
        }
    }

    fn update(id: &str, quantity: i64) -> StockUpdate {
        StockUpdate {
            inventory_id: id.to_string(),
            quantity,
            kind: StockUpdateKind::Adjustment,
            reason: None,
            reference: None,
        }
    }

    #[tokio::test]
    async fn test_manual_sync_creates_one_record_per_unit() {
        let h = harness().await;
        h.link("p1", "SKU-A", None).await;

        let context = SyncContext {
            user_id: Some("u-1".to_string()),
            username: Some("cashier".to_string()),
        };
        let outcome = h
            .coordinator
            .manual_sync(context, ManualSyncOptions::default())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records.iter().all(|r| r.sync_type == SyncType::Manual));
        assert_eq!(outcome.records[0].entity_type, entity::PRODUCT_CATALOG);
        assert_eq!(outcome.records[1].entity_type, entity::STOCK);
        assert_eq!(outcome.records[0].performed_by_username.as_deref(), Some("cashier"));

        // Catalog pass linked p1 by SKU and imported C
        assert_eq!(outcome.records[0].items_processed, 2);
        assert_eq!(outcome.records[1].items_processed, 2);
        assert_eq!(
            h.db.pos_products().get("p1").await.unwrap().inventory_id.as_deref(),
            Some("A")
        );
        assert_eq!(h.events_of(SyncEvent::ManualCompleted).len(), 1);
        assert!(h.coordinator.settings().await.last_sync.is_some());
        assert!(!h.coordinator.is_syncing());
    }

    #[tokio::test]
    async fn test_unreachable_inventory_creates_no_records() {
        let h = harness().await;
        h.fake.set_online(false);

        assert!(!h.coordinator.test_connection().await.connected);

        let err = h
            .coordinator
            .manual_sync(SyncContext::system(), ManualSyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ConnectionFailed(_)));
        assert!(h.coordinator.pending_syncs().await.unwrap().is_empty());
        assert_eq!(h.record_count().await, 0);
        assert!(!h.coordinator.is_syncing());
        assert!(h.events_of(SyncEvent::ManualCompleted).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_cycle_is_rejected_without_records() {
        let h = harness().await;
        h.fake.hold();

        let running = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.sync_products(SyncContext::system()).await })
        };
        h.fake.wait_until_held().await;
        assert!(h.coordinator.is_syncing());

        let err = h
            .coordinator
            .bulk_update_stock(vec![update("A", -1)], SyncContext::system())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadySyncing));
        assert!(matches!(
            h.coordinator.sync_stock(Vec::new(), SyncContext::system()).await,
            Err(SyncError::AlreadySyncing)
        ));
        assert_eq!(h.record_count().await, 0);

        h.fake.release();
        let outcome = running.await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(h.record_count().await, 1);
        assert!(!h.coordinator.is_syncing());
    }

    #[tokio::test]
    async fn test_bulk_update_with_missing_item_is_partial() {
        let h = harness().await;

        let outcome = h
            .coordinator
            .bulk_update_stock(
                vec![update("A", -2), update("B", -1), update("C", 4)],
                SyncContext::system(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.results.len(), 3);
        assert_eq!(outcome.result.summary.success_count, 2);
        assert_eq!(outcome.result.summary.failed_count, 1);

        let record = &outcome.record;
        assert_eq!(record.status, SyncStatus::Partial);
        assert_eq!(record.entity_type, entity::STOCK_BATCH);
        assert_eq!(record.items_processed, 3);
        assert_eq!(record.items_succeeded + record.items_failed, record.items_processed);
        assert_eq!(record.failed_items, vec!["B".to_string()]);
        assert!(record.error_message.is_some());
        assert!(record.next_retry_at.is_some());
        assert!(record.last_synced_at.is_some());

        let events = h.events_of(SyncEvent::StockCompleted);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["summary"]["failedCount"], 1);
    }

    #[tokio::test]
    async fn test_empty_bulk_update_is_rejected() {
        let h = harness().await;
        let err = h
            .coordinator
            .bulk_update_stock(Vec::new(), SyncContext::system())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert_eq!(h.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_product_stock_returns_single_result() {
        let h = harness().await;
        let outcome = h
            .coordinator
            .update_product_stock(update("A", 5), SyncContext::system())
            .await
            .unwrap();
        assert!(outcome.result.success);
        assert_eq!(outcome.result.new_quantity, Some(15));
        assert_eq!(outcome.record.status, SyncStatus::Success);
        assert!(outcome.record.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_disabled_sync_is_a_noop() {
        let h = harness().await;
        h.coordinator.set_enabled(false).await.unwrap();

        for outcome in [
            h.coordinator.sync_products(SyncContext::system()).await.unwrap(),
            h.coordinator.sync_stock(Vec::new(), SyncContext::system()).await.unwrap(),
            h.coordinator
                .manual_sync(SyncContext::system(), ManualSyncOptions::default())
                .await
                .unwrap(),
            h.coordinator.retry_pending_syncs().await.unwrap(),
        ] {
            assert!(outcome.success);
            assert!(outcome.records.is_empty());
        }
        assert_eq!(h.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_sale_updates_stock_and_flags_unlinked_lines() {
        let h = harness().await;
        h.link("p1", "SKU-A", Some("A")).await;
        h.link("p3", "SKU-C", Some("C")).await;
        h.link("p9", "SKU-Z", None).await;

        let sale = SaleData {
            sale_id: "S-100".to_string(),
            receipt_number: Some("R-1".to_string()),
            items: vec![
                SaleLineItem {
                    product_id: "p1".to_string(),
                    quantity: 3,
                    refund: false,
                },
                SaleLineItem {
                    product_id: "p3".to_string(),
                    quantity: 2,
                    refund: true,
                },
                SaleLineItem {
                    product_id: "p9".to_string(),
                    quantity: 1,
                    refund: false,
                },
            ],
        };

        let outcome = h
            .coordinator
            .update_stock_from_sale(sale, SyncContext::system())
            .await
            .unwrap();

        let record = &outcome.records[0];
        assert_eq!(record.sync_type, SyncType::SaleTriggered);
        assert_eq!(record.sync_direction, SyncDirection::PosToInventory);
        assert_eq!(record.entity_id, "S-100");
        assert_eq!(record.status, SyncStatus::Partial);
        assert_eq!(record.failed_items, vec!["p9".to_string()]);

        assert_eq!(h.fake.product("A").unwrap().stock_quantity, 7);
        assert_eq!(h.fake.product("C").unwrap().stock_quantity, 12);
        assert_eq!(h.db.pos_products().get("p1").await.unwrap().current_stock, 7);
    }

    #[tokio::test]
    async fn test_sale_retry_picks_up_products_linked_later() {
        let h = harness().await;
        h.link("p1", "SKU-A", None).await;

        let sale = SaleData {
            sale_id: "S-200".to_string(),
            receipt_number: None,
            items: vec![SaleLineItem {
                product_id: "p1".to_string(),
                quantity: 2,
                refund: false,
            }],
        };
        let first = h
            .coordinator
            .update_stock_from_sale(sale.clone(), SyncContext::system())
            .await
            .unwrap();
        let record = &first.records[0];
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.failed_items, vec!["p1".to_string()]);
        assert_eq!(record.payload, SyncPayload::Sale { sale });
        assert_eq!(h.fake.product("A").unwrap().stock_quantity, 10);

        h.db.pos_products().link("p1", "A").await.unwrap();
        let retried = h.coordinator.force_retry(record.id).await.unwrap();
        let record = &retried.records[0];
        assert_eq!(record.status, SyncStatus::Success);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.items_processed, 1);
        assert_eq!(record.items_succeeded, 1);
        assert!(record.failed_items.is_empty());
        assert_eq!(h.fake.product("A").unwrap().stock_quantity, 8);
        assert_eq!(h.events_of(SyncEvent::StockCompleted).len(), 2);
    }

    #[tokio::test]
    async fn test_sale_is_noop_when_auto_update_is_off() {
        let h = harness().await;
        h.link("p1", "SKU-A", Some("A")).await;
        h.coordinator.set_auto_update_on_sale(false).await.unwrap();

        let sale = SaleData {
            sale_id: "S-1".to_string(),
            receipt_number: None,
            items: vec![SaleLineItem {
                product_id: "p1".to_string(),
                quantity: 1,
                refund: false,
            }],
        };
        let outcome = h
            .coordinator
            .update_stock_from_sale(sale, SyncContext::system())
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.records.is_empty());
        assert_eq!(h.fake.product("A").unwrap().stock_quantity, 10);
    }

    #[tokio::test]
    async fn test_force_retry_reruns_only_failed_items() {
        let h = harness().await;
        h.fake.fail_item("C");

        let first = h
            .coordinator
            .bulk_update_stock(
                vec![update("A", -1), update("C", -1), update("B", -1)],
                SyncContext::system(),
            )
            .await
            .unwrap();
        assert_eq!(first.record.items_failed, 2);
        let calls_before = h.fake.adjust_calls();

        h.fake.heal_item("C");
        let outcome = h.coordinator.force_retry(first.record.id).await.unwrap();
        let record = &outcome.records[0];

        // C and B re-ran, A did not
        assert_eq!(h.fake.adjust_calls() - calls_before, 2);
        assert_eq!(h.fake.product("A").unwrap().stock_quantity, 9);
        assert_eq!(record.id, first.record.id);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.items_processed, 3);
        assert_eq!(record.items_succeeded, 2);
        assert_eq!(record.items_failed, 1);
        assert_eq!(record.failed_items, vec!["B".to_string()]);
        assert_eq!(record.status, SyncStatus::Partial);
        assert!(record.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_mid_cycle_finishes_the_record() {
        let h = harness().await;
        h.link("p1", "SKU-A", Some("A")).await;
        sqlx::query("DROP TABLE pos_products")
            .execute(h.db.pool())
            .await
            .unwrap();

        let outcome = h
            .coordinator
            .sync_stock(Vec::new(), SyncContext::system())
            .await
            .unwrap();
        assert!(!outcome.success);
        let record = &outcome.records[0];
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.failed_items, vec![entity::ALL.to_string()]);
        assert!(record.error_message.is_some());
        assert!(record.completed_at.is_some());
        assert!(record.next_retry_at.is_some());

        // Nothing is left looking in flight, and the cycle still completed
        let stats = h.coordinator.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert!(h.coordinator.settings().await.last_sync.is_some());
        assert_eq!(h.events_of(SyncEvent::StockCompleted).len(), 1);
        assert!(!h.coordinator.is_syncing());
    }

    #[tokio::test]
    async fn test_retry_pass_continues_past_a_failing_unit() {
        let h = harness().await;
        h.fake.fail_item("A");

        let bulk = h
            .coordinator
            .bulk_update_stock(vec![update("A", -1)], SyncContext::system())
            .await
            .unwrap();
        assert_eq!(bulk.record.status, SyncStatus::Failed);

        sqlx::query("DROP TABLE pos_products")
            .execute(h.db.pool())
            .await
            .unwrap();
        let pull = h
            .coordinator
            .sync_stock(Vec::new(), SyncContext::system())
            .await
            .unwrap();
        assert_eq!(pull.records[0].status, SyncStatus::Failed);

        // Make both due now
        assert_eq!(h.coordinator.reset_failed_syncs(None).await.unwrap(), 2);
        h.fake.heal_item("A");

        let pass = h.coordinator.retry_pending_syncs().await.unwrap();
        assert_eq!(pass.records.len(), 2);
        let bulk_after = pass.records.iter().find(|r| r.id == bulk.record.id).unwrap();
        let pull_after = pass
            .records
            .iter()
            .find(|r| r.id == pull.records[0].id)
            .unwrap();
        assert_eq!(bulk_after.status, SyncStatus::Success);
        assert_eq!(pull_after.status, SyncStatus::Failed);
        assert_eq!(pull_after.retry_count, 1);
        assert_eq!(h.fake.product("A").unwrap().stock_quantity, 9);
        assert_eq!(h.coordinator.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_retries_publish_the_event_of_their_record_type() {
        let h = harness().await;
        h.link("p3", "SKU-C", Some("C")).await;
        // A POS-owned rename makes the pass push to C, which fails
        sqlx::query("UPDATE pos_products SET name = 'Till Name' WHERE id = 'p3'")
            .execute(h.db.pool())
            .await
            .unwrap();
        h.fake.fail_item("C");

        let products = h.coordinator.sync_products(SyncContext::system()).await.unwrap();
        let record = &products.records[0];
        assert_eq!(record.status, SyncStatus::Partial);
        assert_eq!(h.events_of(SyncEvent::ProductsCompleted).len(), 1);

        h.fake.heal_item("C");
        let retried = h.coordinator.force_retry(record.id).await.unwrap();
        assert_eq!(retried.records[0].status, SyncStatus::Success);
        assert_eq!(h.events_of(SyncEvent::ProductsCompleted).len(), 2);
        assert!(h.events_of(SyncEvent::StockCompleted).is_empty());
        assert_eq!(h.fake.product("C").unwrap().name, "Till Name");

        assert_eq!(completion_event(SyncType::Manual), SyncEvent::ManualCompleted);
        assert_eq!(completion_event(SyncType::SaleTriggered), SyncEvent::StockCompleted);
    }

    #[tokio::test]
    async fn test_force_retry_rejects_successful_and_unknown_records() {
        let h = harness().await;
        let ok = h
            .coordinator
            .bulk_update_stock(vec![update("A", 1)], SyncContext::system())
            .await
            .unwrap();

        assert!(matches!(
            h.coordinator.force_retry(ok.record.id).await,
            Err(SyncError::NotRetryable { .. })
        ));
        assert!(matches!(
            h.coordinator.force_retry(4242).await,
            Err(SyncError::RecordNotFound(4242))
        ));
        assert!(!h.coordinator.is_syncing());
    }

    #[tokio::test]
    async fn test_exhausted_record_waits_for_reset() {
        let mut config = BridgeConfig::default();
        config.retry.max_retries = 1;
        let h = harness_with(
            FakeInventory::new().with_product(inventory_product("A", "SKU-A", 10, 100)),
            config,
        )
        .await;
        h.fake.fail_item("A");

        let first = h
            .coordinator
            .bulk_update_stock(vec![update("A", -1)], SyncContext::system())
            .await
            .unwrap();
        assert_eq!(first.record.status, SyncStatus::Failed);

        let retried = h.coordinator.force_retry(first.record.id).await.unwrap();
        let record = &retried.records[0];
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.status, SyncStatus::Failed);
        assert!(record.next_retry_at.is_none());

        assert!(matches!(
            h.coordinator.force_retry(record.id).await,
            Err(SyncError::NotRetryable { .. })
        ));
        let pass = h.coordinator.retry_pending_syncs().await.unwrap();
        assert!(pass.records.is_empty());

        // Reset: counters cleared, status untouched, due immediately
        assert_eq!(h.coordinator.reset_failed_syncs(None).await.unwrap(), 1);
        let reset = h.db.sync_records().get(record.id).await.unwrap();
        assert_eq!(reset.retry_count, 0);
        assert_eq!(reset.status, SyncStatus::Failed);
        assert!(reset.next_retry_at.is_none());

        h.fake.heal_item("A");
        let pass = h.coordinator.retry_pending_syncs().await.unwrap();
        assert_eq!(pass.records.len(), 1);
        assert_eq!(pass.records[0].status, SyncStatus::Success);
        assert_eq!(pass.records[0].retry_count, 1);
        assert_eq!(h.fake.product("A").unwrap().stock_quantity, 9);
    }

    #[tokio::test]
    async fn test_interrupted_record_is_recovered_and_rerun() {
        let h = harness().await;
        let stuck = h
            .db
            .sync_records()
            .create(&NewSyncRecord {
                entity_type: entity::STOCK_BATCH.to_string(),
                entity_id: "crashed".to_string(),
                sync_type: SyncType::Stock,
                sync_direction: SyncDirection::PosToInventory,
                payload: SyncPayload::StockUpdates {
                    updates: vec![update("A", -4)],
                },
                context: SyncContext::system(),
            })
            .await
            .unwrap();

        let recovered = h
            .coordinator
            .scheduler
            .recover_interrupted(Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(recovered, 1);
        let failed = h.db.sync_records().get(stuck.id).await.unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some(titan_db::INTERRUPTED_MESSAGE));

        let pass = h.coordinator.retry_pending_syncs().await.unwrap();
        let record = &pass.records[0];
        assert_eq!(record.status, SyncStatus::Success);
        assert_eq!(record.items_processed, 1);
        assert_eq!(record.items_succeeded, 1);
        assert_eq!(h.fake.product("A").unwrap().stock_quantity, 6);
    }

    #[tokio::test]
    async fn test_sync_interval_setting() {
        let h = harness().await;

        let settings = h.coordinator.set_sync_interval(45_000).await.unwrap();
        assert_eq!(settings.sync_interval_ms, 45_000);
        assert_eq!(h.coordinator.settings().await.sync_interval_ms, 45_000);

        for bad in [0, -5] {
            let err = h.coordinator.set_sync_interval(bad).await.unwrap_err();
            assert!(matches!(err, SyncError::InvalidSetting(_)));
            assert_eq!(h.coordinator.settings().await.sync_interval_ms, 45_000);
        }

        // Tiny intervals are stored but the timer clamps them
        h.coordinator.set_sync_interval(10).await.unwrap();
        assert_eq!(h.coordinator.settings().await.sync_interval_ms, 10);
        assert_eq!(
            h.coordinator.tick_period().await,
            Duration::from_millis(MIN_TICK_INTERVAL_MS)
        );

        let events = h.events_of(SyncEvent::ConfigUpdated);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], json!({"key": "syncInterval", "value": 45_000}));

        // Persisted
        let stored = h
            .db
            .settings()
            .load(&SyncSettings::default())
            .await
            .unwrap();
        assert_eq!(stored.sync_interval_ms, 10);
    }

    #[tokio::test]
    async fn test_initialize_settings_persists_defaults_once() {
        let mut config = BridgeConfig::default();
        config.sync.auto_update_on_sale = false;
        let h = harness_with(FakeInventory::new(), config).await;

        assert!(!h.db.settings().is_initialized().await.unwrap());
        let settings = h.coordinator.initialize_settings().await.unwrap();
        assert!(!settings.auto_update_on_sale);
        assert!(h.db.settings().is_initialized().await.unwrap());

        h.coordinator.set_enabled(false).await.unwrap();
        let again = h.coordinator.initialize_settings().await.unwrap();
        assert!(!again.enabled);
    }

    #[tokio::test]
    async fn test_timer_runs_products_cycles_until_stopped() {
        let h = harness().await;
        h.coordinator.set_sync_interval(1).await.unwrap();

        assert!(h.coordinator.start());
        assert!(!h.coordinator.start());
        assert!(h.coordinator.status().await.timer_running);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(h.coordinator.stop());
        assert!(!h.coordinator.stop());
        assert!(!h.coordinator.is_timer_running());

        let records = h.coordinator.history(&HistoryFilter::default()).await.unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.sync_type == SyncType::Products));
        assert!(!h.events_of(SyncEvent::ProductsCompleted).is_empty());
    }

    #[tokio::test]
    async fn test_offline_tick_records_nothing() {
        let h = harness().await;
        h.fake.set_online(false);

        h.coordinator.run_tick().await;
        assert_eq!(h.record_count().await, 0);
        assert!(!h.coordinator.is_syncing());
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(!SyncError::InvalidConfig("bad url".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_cleanup_and_status() {
        let h = harness().await;
        h.coordinator
            .bulk_update_stock(vec![update("B", -1)], SyncContext::system())
            .await
            .unwrap();

        let report = h.coordinator.cleanup_sync_data(None).await.unwrap();
        assert_eq!(report, CleanupReport { removed: 0, recovered: 0 });

        let detailed = h.coordinator.detailed_status().await.unwrap();
        assert!(detailed.connection.connected);
        assert_eq!(detailed.stats.failed, 1);
        assert_eq!(detailed.pending_count, 1);

        let full = h.coordinator.full_config().await;
        assert_eq!(full.max_retries, 5);
        assert_eq!(full.min_tick_interval_ms, MIN_TICK_INTERVAL_MS);
    }
}
