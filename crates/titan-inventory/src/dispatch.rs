//! # Method Dispatcher
//!
//! Maps `{method, params}` envelopes onto engine operations.
//!
//! ## Envelope
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Request                          Response                              │
//! │  ───────                          ────────                              │
//! │  {                                {                                     │
//! │    "method": "forceRetry",          "status": false,                    │
//! │    "params": { "syncId": 42 }       "message": "A synchronization is    │
//! │  }                                              already in progress",   │
//! │                                     "data": null,                       │
//! │                                     "code": "ALREADY_SYNCING"           │
//! │                                   }                                     │
//! │                                                                         │
//! │  Every failure becomes status=false. Nothing escapes as a panic.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::coordinator::{ManualSyncOptions, SyncCoordinator};
use crate::error::{ErrorCode, SyncError};
use titan_core::validation::{validate_days_to_keep, validate_page};
use titan_core::{
    ProductQuery, SaleData, StockUpdate, SyncContext, SyncSetting, SyncStatus, SyncType,
};
use titan_db::HistoryFilter;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const DEFAULT_ENTITY_HISTORY_LIMIT: i64 = 20;

// =============================================================================
// Envelope
// =============================================================================

/// Incoming call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Answer to every call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: bool,
    pub message: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<ErrorCode>,
}

impl Response {
    fn ok(message: impl Into<String>, data: Value) -> Self {
        Response {
            status: true,
            message: message.into(),
            data,
            code: None,
        }
    }

    /// A failed response, for envelope errors raised outside the dispatcher.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response {
            status: false,
            message: message.into(),
            data: Value::Null,
            code: Some(code),
        }
    }
}

/// Why a call did not reach, or failed in, the engine.
enum Failure {
    UnknownMethod(String),
    InvalidParams(String),
    Engine(SyncError),
}

impl From<SyncError> for Failure {
    fn from(err: SyncError) -> Self {
        Failure::Engine(err)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Failure::Engine(err.into())
    }
}

impl From<titan_core::ValidationError> for Failure {
    fn from(err: titan_core::ValidationError) -> Self {
        Failure::InvalidParams(err.to_string())
    }
}

impl From<Failure> for Response {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::UnknownMethod(method) => {
                Response::error(ErrorCode::UnknownMethod, format!("Unknown method: {method}"))
            }
            Failure::InvalidParams(message) => {
                Response::error(ErrorCode::InvalidParams, format!("Invalid params: {message}"))
            }
            Failure::Engine(err) => Response::error(err.code(), err.to_string()),
        }
    }
}

type Answer = Result<(String, Value), Failure>;

// =============================================================================
// Params
// =============================================================================

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, Failure> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| Failure::InvalidParams(e.to_string()))
}

fn context_or_system(context: Option<SyncContext>) -> SyncContext {
    context.unwrap_or_else(SyncContext::system)
}

#[derive(Deserialize)]
struct ContextParams {
    #[serde(default)]
    context: Option<SyncContext>,
}

#[derive(Deserialize)]
struct ManualSyncParams {
    #[serde(default)]
    context: Option<SyncContext>,
    #[serde(default)]
    options: Option<ManualSyncOptions>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncStockParams {
    #[serde(default)]
    product_ids: Vec<String>,
    #[serde(default)]
    context: Option<SyncContext>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaleParams {
    sale_data: SaleData,
    #[serde(default)]
    context: Option<SyncContext>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    limit: Option<i64>,
    offset: Option<i64>,
    sync_type: Option<SyncType>,
    status: Option<SyncStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityHistoryParams {
    entity_type: String,
    entity_id: String,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct SettingParams {
    key: String,
    value: Value,
}

#[derive(Deserialize)]
struct EnabledParams {
    enabled: bool,
}

#[derive(Deserialize)]
struct IntervalParams {
    interval: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncIdParams {
    sync_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityTypeParams {
    #[serde(default)]
    entity_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetentionParams {
    days_to_keep: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupParams {
    #[serde(default)]
    days_to_keep: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryIdParams {
    inventory_id: String,
}

#[derive(Deserialize)]
struct UpdateStockParams {
    #[serde(flatten)]
    update: StockUpdate,
    #[serde(default)]
    context: Option<SyncContext>,
}

#[derive(Deserialize)]
struct BulkParams {
    updates: Vec<StockUpdate>,
    #[serde(default)]
    context: Option<SyncContext>,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes method calls to a [`SyncCoordinator`].
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<SyncCoordinator>,
}

impl Dispatcher {
    pub fn new(engine: Arc<SyncCoordinator>) -> Self {
        Dispatcher { engine }
    }

    pub fn engine(&self) -> &Arc<SyncCoordinator> {
        &self.engine
    }

    /// Handles a whole request envelope.
    pub async fn handle(&self, request: Request) -> Response {
        self.dispatch(&request.method, request.params).await
    }

    /// Runs `method` with `params`. Never fails: errors are in the response.
    pub async fn dispatch(&self, method: &str, params: Value) -> Response {
        debug!(method, "Dispatching call");
        match self.route(method, params).await {
            Ok((message, data)) => Response::ok(message, data),
            Err(failure) => {
                let response = Response::from(failure);
                warn!(method, code = ?response.code, message = %response.message, "Call failed");
                response
            }
        }
    }

    async fn route(&self, method: &str, params: Value) -> Answer {
        let engine = &self.engine;
        match method {
            // -----------------------------------------------------------------
            // Status
            // -----------------------------------------------------------------
            "getStatus" => ok("Status retrieved", &engine.status().await),
            "getDetailedStatus" => ok("Detailed status retrieved", &engine.detailed_status().await?),
            "getSyncConfig" => ok("Sync settings retrieved", &engine.settings().await),
            "getFullConfig" => ok("Configuration retrieved", &engine.full_config().await),

            // -----------------------------------------------------------------
            // Cycles
            // -----------------------------------------------------------------
            "manualSync" => {
                let p: ManualSyncParams = parse(params)?;
                let outcome = engine
                    .manual_sync(context_or_system(p.context), p.options.unwrap_or_default())
                    .await?;
                ok(outcome.message.clone(), &outcome)
            }
            "syncProducts" => {
                let p: ContextParams = parse(params)?;
                let outcome = engine.sync_products(context_or_system(p.context)).await?;
                ok(outcome.message.clone(), &outcome)
            }
            "syncStock" => {
                let p: SyncStockParams = parse(params)?;
                let outcome = engine
                    .sync_stock(p.product_ids, context_or_system(p.context))
                    .await?;
                ok(outcome.message.clone(), &outcome)
            }
            "updateStockFromSale" => {
                let p: SaleParams = parse(params)?;
                let outcome = engine
                    .update_stock_from_sale(p.sale_data, context_or_system(p.context))
                    .await?;
                ok(outcome.message.clone(), &outcome)
            }
            "updateProductStock" => {
                let p: UpdateStockParams = parse(params)?;
                let outcome = engine
                    .update_product_stock(p.update, context_or_system(p.context))
                    .await?;
                let message = match &outcome.result.error {
                    None => "Stock updated".to_string(),
                    Some(e) => format!("Stock update failed: {e}"),
                };
                ok(message, &outcome)
            }
            "bulkUpdateStock" => {
                let p: BulkParams = parse(params)?;
                let outcome = engine
                    .bulk_update_stock(p.updates, context_or_system(p.context))
                    .await?;
                let summary = &outcome.result.summary;
                ok(
                    format!(
                        "Updated {} of {} item(s)",
                        summary.success_count, summary.total
                    ),
                    &outcome,
                )
            }

            // -----------------------------------------------------------------
            // Timer
            // -----------------------------------------------------------------
            "startSync" => {
                let started = engine.start();
                let message = if started { "Sync timer started" } else { "Sync timer already running" };
                ok(message, &engine.status().await)
            }
            "stopSync" => {
                let stopped = engine.stop();
                let message = if stopped { "Sync timer stopped" } else { "Sync timer not running" };
                ok(message, &engine.status().await)
            }

            // -----------------------------------------------------------------
            // Records
            // -----------------------------------------------------------------
            "getSyncHistory" => {
                let p: HistoryParams = parse(params)?;
                let (limit, offset) = validate_page(p.limit, p.offset, DEFAULT_HISTORY_LIMIT)?;
                let filter = HistoryFilter {
                    limit,
                    offset,
                    sync_type: p.sync_type,
                    status: p.status,
                };
                let records = engine.history(&filter).await?;
                ok(format!("{} record(s)", records.len()), &records)
            }
            "getSyncStats" => ok("Statistics retrieved", &engine.stats().await?),
            "getPendingSyncs" => {
                let records = engine.pending_syncs().await?;
                ok(format!("{} pending record(s)", records.len()), &records)
            }
            "getEntitySyncHistory" => {
                let p: EntityHistoryParams = parse(params)?;
                let (limit, _) = validate_page(p.limit, None, DEFAULT_ENTITY_HISTORY_LIMIT)?;
                let records = engine
                    .entity_history(&p.entity_type, &p.entity_id, limit)
                    .await?;
                ok(format!("{} record(s)", records.len()), &records)
            }

            // -----------------------------------------------------------------
            // Settings
            // -----------------------------------------------------------------
            "updateSyncSetting" => {
                let p: SettingParams = parse(params)?;
                let setting = SyncSetting::parse(&p.key, &p.value).map_err(SyncError::from)?;
                ok("Setting updated", &engine.update_setting(setting).await?)
            }
            "setSyncEnabled" => {
                let p: EnabledParams = parse(params)?;
                let message = if p.enabled { "Sync enabled" } else { "Sync disabled" };
                ok(message, &engine.set_enabled(p.enabled).await?)
            }
            "setAutoUpdateOnSale" => {
                let p: EnabledParams = parse(params)?;
                ok(
                    "Auto update on sale changed",
                    &engine.set_auto_update_on_sale(p.enabled).await?,
                )
            }
            "setSyncInterval" => {
                let p: IntervalParams = parse(params)?;
                ok("Sync interval changed", &engine.set_sync_interval(p.interval).await?)
            }
            "initializeSettings" => ok("Settings initialized", &engine.initialize_settings().await?),

            // -----------------------------------------------------------------
            // Retries & Housekeeping
            // -----------------------------------------------------------------
            "forceRetry" => {
                let p: SyncIdParams = parse(params)?;
                let outcome = engine.force_retry(p.sync_id).await?;
                ok(outcome.message.clone(), &outcome)
            }
            "retryPendingSyncs" => {
                let outcome = engine.retry_pending_syncs().await?;
                ok(outcome.message.clone(), &outcome)
            }
            "resetFailedSyncs" => {
                let p: EntityTypeParams = parse(params)?;
                let count = engine.reset_failed_syncs(p.entity_type.as_deref()).await?;
                ok(format!("Reset {count} record(s)"), &json!({ "count": count }))
            }
            "cleanOldRecords" => {
                let p: RetentionParams = parse(params)?;
                let days = validate_days_to_keep(p.days_to_keep)?;
                let count = engine.clean_old_records(days).await?;
                ok(format!("Removed {count} record(s)"), &json!({ "count": count }))
            }
            "cleanupSyncData" => {
                let p: CleanupParams = parse(params)?;
                let days = p.days_to_keep.map(validate_days_to_keep).transpose()?;
                let report = engine.cleanup_sync_data(days).await?;
                ok(
                    format!(
                        "Removed {} record(s), recovered {}",
                        report.removed, report.recovered
                    ),
                    &report,
                )
            }

            // -----------------------------------------------------------------
            // Inventory
            // -----------------------------------------------------------------
            "testConnection" | "checkInventoryConnection" => {
                let status = engine.test_connection().await;
                ok(status.message.clone(), &status)
            }
            "getInventoryInfo" => ok("Inventory info retrieved", &engine.inventory_info().await?),
            "getInventoryProducts" => {
                let query: ProductQuery = parse(params)?;
                validate_page(query.limit, query.offset, DEFAULT_HISTORY_LIMIT)?;
                let products = engine.inventory_products(&query).await?;
                ok(format!("{} product(s)", products.len()), &products)
            }
            "getProductStock" => {
                let p: InventoryIdParams = parse(params)?;
                ok("Stock retrieved", &engine.product_stock(&p.inventory_id).await?)
            }
            "getProductVariants" => {
                let p: InventoryIdParams = parse(params)?;
                let variants = engine.product_variants(&p.inventory_id).await?;
                ok(format!("{} variant(s)", variants.len()), &variants)
            }
            "getWarehouses" => {
                let warehouses = engine.warehouses().await?;
                ok(format!("{} warehouse(s)", warehouses.len()), &warehouses)
            }

            other => Err(Failure::UnknownMethod(other.to_string())),
        }
    }
}

fn ok<T: Serialize>(message: impl Into<String>, data: &T) -> Answer {
    Ok((message.into(), serde_json::to_value(data)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::notifier::EventNotifier;
    use crate::test_support::{inventory_product, FakeInventory};
    use titan_db::{Database, DbConfig};

    async fn dispatcher() -> (Arc<FakeInventory>, Dispatcher) {
        let fake = Arc::new(
            FakeInventory::new()
                .with_product(inventory_product("A", "SKU-A", 10, 250))
                .with_product(inventory_product("B", "SKU-B", 3, 400)),
        );
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = SyncCoordinator::new(&db, fake.clone(), &BridgeConfig::default(), EventNotifier::new())
            .await
            .unwrap();
        (fake, Dispatcher::new(Arc::new(engine)))
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_, d) = dispatcher().await;
        let response = d.dispatch("syncEverything", Value::Null).await;
        assert!(!response.status);
        assert_eq!(response.code, Some(ErrorCode::UnknownMethod));
        assert_eq!(response.data, Value::Null);

        // Method names are case-sensitive
        let response = d.dispatch("getstatus", Value::Null).await;
        assert_eq!(response.code, Some(ErrorCode::UnknownMethod));
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let (_, d) = dispatcher().await;

        for (method, params) in [
            ("setSyncInterval", json!({"interval": "soon"})),
            ("forceRetry", json!({})),
            ("getProductStock", json!({"id": "A"})),
            ("getSyncHistory", json!({"limit": 0})),
            ("cleanOldRecords", json!({"daysToKeep": -1})),
            ("updateStockFromSale", json!({"saleData": {"saleId": "", "items": []}})),
        ] {
            let response = d.dispatch(method, params).await;
            assert!(!response.status, "{method} should fail");
            assert_eq!(response.code, Some(ErrorCode::InvalidParams), "{method}");
        }
    }

    #[tokio::test]
    async fn test_setting_errors_keep_previous_value() {
        let (_, d) = dispatcher().await;

        let response = d.dispatch("setSyncInterval", json!({"interval": 0})).await;
        assert!(!response.status);
        assert_eq!(response.code, Some(ErrorCode::InvalidSetting));

        let response = d
            .dispatch("updateSyncSetting", json!({"key": "colour", "value": "red"}))
            .await;
        assert_eq!(response.code, Some(ErrorCode::InvalidSetting));

        let response = d.dispatch("getSyncConfig", Value::Null).await;
        assert_eq!(response.data["syncInterval"], 300_000);
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let (_, d) = dispatcher().await;

        let response = d
            .dispatch("updateSyncSetting", json!({"key": "syncInterval", "value": 60_000}))
            .await;
        assert!(response.status);
        assert_eq!(response.data["syncInterval"], 60_000);

        let response = d.dispatch("setSyncEnabled", json!({"enabled": false})).await;
        assert_eq!(response.data["enabled"], false);

        let response = d.dispatch("getStatus", Value::Null).await;
        assert_eq!(response.data["isSyncing"], false);
        assert_eq!(response.data["enabled"], false);
        assert_eq!(response.data["syncInterval"], 60_000);

        let response = d.dispatch("setSyncInterval", json!({"interval": 12_345})).await;
        assert!(response.status);
        let response = d.dispatch("getSyncConfig", Value::Null).await;
        assert_eq!(response.data["syncInterval"], 12_345);
        assert!(response.data.get("syncIntervalMs").is_none());

        let response = d.dispatch("getFullConfig", Value::Null).await;
        assert!(response.data.get("apiKey").is_none());
        assert_eq!(response.data["maxRetries"], 5);
    }

    #[tokio::test]
    async fn test_bulk_update_and_retry_flow() {
        let (fake, d) = dispatcher().await;
        fake.fail_item("B");

        let response = d
            .dispatch(
                "bulkUpdateStock",
                json!({"updates": [
                    {"inventoryId": "A", "quantity": -2},
                    {"inventoryId": "B", "quantity": -1, "kind": "sale"}
                ]}),
            )
            .await;
        assert!(response.status);
        assert_eq!(response.data["summary"]["successCount"], 1);
        assert_eq!(response.data["summary"]["failedCount"], 1);
        assert_eq!(response.data["record"]["status"], "partial");
        let sync_id = response.data["record"]["id"].as_i64().unwrap();

        let response = d.dispatch("getPendingSyncs", Value::Null).await;
        assert_eq!(response.data.as_array().unwrap().len(), 1);

        fake.heal_item("B");
        let response = d.dispatch("forceRetry", json!({"syncId": sync_id})).await;
        assert!(response.status);
        assert_eq!(response.data["records"][0]["status"], "success");
        assert_eq!(response.data["records"][0]["retryCount"], 1);

        let response = d
            .dispatch(
                "getEntitySyncHistory",
                json!({"entityType": "stock_batch", "entityId": response.data["records"][0]["entityId"]}),
            )
            .await;
        assert_eq!(response.data.as_array().unwrap().len(), 1);

        let response = d.dispatch("resetFailedSyncs", json!({})).await;
        assert_eq!(response.data, json!({"count": 0}));

        let response = d.dispatch("getSyncStats", Value::Null).await;
        assert_eq!(response.data["success"], 1);
    }

    #[tokio::test]
    async fn test_connection_failure_code() {
        let (fake, d) = dispatcher().await;
        fake.set_online(false);

        let response = d.dispatch("syncProducts", Value::Null).await;
        assert!(!response.status);
        assert_eq!(response.code, Some(ErrorCode::ConnectionFailed));

        // The probe itself answers normally
        let response = d.dispatch("checkInventoryConnection", Value::Null).await;
        assert!(response.status);
        assert_eq!(response.data["connected"], false);
    }

    #[tokio::test]
    async fn test_inventory_passthrough() {
        let (_, d) = dispatcher().await;

        let response = d.dispatch("getInventoryProducts", json!({"search": "SKU-B"})).await;
        assert_eq!(response.data.as_array().unwrap().len(), 1);

        let response = d.dispatch("getProductStock", json!({"inventoryId": "A"})).await;
        assert_eq!(response.data["quantity"], 10);

        let response = d.dispatch("getProductStock", json!({"inventoryId": "Z"})).await;
        assert_eq!(response.code, Some(ErrorCode::NotFound));

        let response = d.dispatch("getWarehouses", Value::Null).await;
        assert_eq!(response.data[0]["id"], "WH-1");

        let response = d.dispatch("getInventoryInfo", Value::Null).await;
        assert_eq!(response.data["productCount"], 2);
    }

    #[tokio::test]
    async fn test_timer_methods() {
        let (_, d) = dispatcher().await;

        let response = d.dispatch("startSync", Value::Null).await;
        assert_eq!(response.data["timerRunning"], true);
        let response = d.dispatch("stopSync", Value::Null).await;
        assert_eq!(response.data["timerRunning"], false);
        assert_eq!(response.message, "Sync timer stopped");
    }

    #[test]
    fn test_response_wire_shape() {
        let ok = Response::ok("done", json!([1]));
        let wire = serde_json::to_value(&ok).unwrap();
        assert!(wire.get("code").is_none());

        let err = Response::from(Failure::Engine(SyncError::AlreadySyncing));
        let wire = serde_json::to_value(&err).unwrap();
        assert_eq!(wire["code"], "ALREADY_SYNCING");
        assert_eq!(wire["status"], false);
    }
}
