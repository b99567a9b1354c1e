//! # Inventory Client
//!
//! The boundary to the external inventory system of record.
//!
//! ## REST Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  InventoryClient method      HTTP                                       │
//! │  ─────────────────────────   ──────────────────────────────────────     │
//! │  health()                    GET   /health                              │
//! │  info()                      GET   /info                                │
//! │  list_products(query)        GET   /products?search=&limit=&offset=     │
//! │  get_product(id)             GET   /products/{id}                       │
//! │  get_stock(id)               GET   /products/{id}/stock                 │
//! │  adjust_stock(update)        POST  /products/{id}/stock/adjust          │
//! │  update_product_details()    PATCH /products/{id}                       │
//! │  get_variants(id)            GET   /products/{id}/variants              │
//! │  get_warehouses()            GET   /warehouses                          │
//! │                                                                         │
//! │  404 → NotFound   409 → Conflict   422 insufficient_stock → Insufficient│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::InventoryConfig;
use crate::error::{InventoryError, SyncResult};
use titan_core::{
    InventoryInfo, InventoryProduct, ProductPatch, ProductQuery, ProductVariant, StockLevel,
    StockUpdate, Warehouse,
};

/// Result type for single inventory calls.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Stock before and after an adjustment, as reported by the inventory system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    pub previous_quantity: i64,
    pub new_quantity: i64,
}

/// Operations the engine needs from the inventory system.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Succeeds when the inventory system answers and reports healthy.
    async fn health(&self) -> InventoryResult<()>;

    async fn info(&self) -> InventoryResult<InventoryInfo>;

    /// One page of the catalog.
    async fn list_products(&self, query: &ProductQuery) -> InventoryResult<Vec<InventoryProduct>>;

    async fn get_product(&self, inventory_id: &str) -> InventoryResult<InventoryProduct>;

    async fn get_stock(&self, inventory_id: &str) -> InventoryResult<StockLevel>;

    /// Applies a signed delta to one item.
    async fn adjust_stock(&self, update: &StockUpdate) -> InventoryResult<StockAdjustment>;

    /// Pushes POS-owned fields to the inventory system.
    async fn update_product_details(
        &self,
        inventory_id: &str,
        patch: &ProductPatch,
    ) -> InventoryResult<InventoryProduct>;

    async fn get_variants(&self, inventory_id: &str) -> InventoryResult<Vec<ProductVariant>>;

    async fn get_warehouses(&self) -> InventoryResult<Vec<Warehouse>>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// Error body returned by the inventory API on 4xx/5xx.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// REST/JSON client for the inventory API.
#[derive(Debug, Clone)]
pub struct HttpInventoryClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpInventoryClient {
    /// Builds a client from the `[inventory]` section.
    pub fn new(config: &InventoryConfig) -> SyncResult<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| InventoryError::Transport(e.to_string()))?;

        Ok(HttpInventoryClient {
            http,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    /// Appends path segments to the base URL. Ids are percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> InventoryResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| InventoryError::Transport(format!("invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, subject: &str) -> InventoryResult<T> {
        let response = builder.send().await?;
        decode(response, subject).await
    }
}

/// Turns a response into `T` or the matching [`InventoryError`].
async fn decode<T: DeserializeOwned>(response: Response, subject: &str) -> InventoryResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| InventoryError::Decode(e.to_string()));
    }

    let body = response.json::<ErrorBody>().await.unwrap_or_default();
    Err(error_for_status(status.as_u16(), subject, body))
}

fn error_for_status(status: u16, subject: &str, body: ErrorBody) -> InventoryError {
    match status {
        404 => InventoryError::NotFound(subject.to_string()),
        409 => InventoryError::Conflict(body.message.unwrap_or_else(|| subject.to_string())),
        422 if body.code.as_deref() == Some("insufficient_stock") => {
            InventoryError::InsufficientStock(subject.to_string())
        }
        _ => InventoryError::Rejected {
            status,
            message: body
                .message
                .or(body.code)
                .unwrap_or_else(|| "no details".to_string()),
        },
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn health(&self) -> InventoryResult<()> {
        let url = self.endpoint(&["health"])?;
        let response = self.request(Method::GET, url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.json::<ErrorBody>().await.unwrap_or_default();
            Err(error_for_status(status.as_u16(), "health", body))
        }
    }

    async fn info(&self) -> InventoryResult<InventoryInfo> {
        let url = self.endpoint(&["info"])?;
        self.send(self.request(Method::GET, url), "info").await
    }

    async fn list_products(&self, query: &ProductQuery) -> InventoryResult<Vec<InventoryProduct>> {
        let mut url = self.endpoint(&["products"])?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(search) = &query.search {
                pairs.append_pair("search", search);
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            if let Some(offset) = query.offset {
                pairs.append_pair("offset", &offset.to_string());
            }
        }
        debug!(%url, "Listing inventory products");
        self.send(self.request(Method::GET, url), "products").await
    }

    async fn get_product(&self, inventory_id: &str) -> InventoryResult<InventoryProduct> {
        let url = self.endpoint(&["products", inventory_id])?;
        self.send(self.request(Method::GET, url), inventory_id).await
    }

    async fn get_stock(&self, inventory_id: &str) -> InventoryResult<StockLevel> {
        let url = self.endpoint(&["products", inventory_id, "stock"])?;
        self.send(self.request(Method::GET, url), inventory_id).await
    }

    async fn adjust_stock(&self, update: &StockUpdate) -> InventoryResult<StockAdjustment> {
        let url = self.endpoint(&["products", &update.inventory_id, "stock", "adjust"])?;
        self.send(self.request(Method::POST, url).json(update), &update.inventory_id)
            .await
    }

    async fn update_product_details(
        &self,
        inventory_id: &str,
        patch: &ProductPatch,
    ) -> InventoryResult<InventoryProduct> {
        let url = self.endpoint(&["products", inventory_id])?;
        self.send(self.request(Method::PATCH, url).json(patch), inventory_id)
            .await
    }

    async fn get_variants(&self, inventory_id: &str) -> InventoryResult<Vec<ProductVariant>> {
        let url = self.endpoint(&["products", inventory_id, "variants"])?;
        self.send(self.request(Method::GET, url), inventory_id).await
    }

    async fn get_warehouses(&self) -> InventoryResult<Vec<Warehouse>> {
        let url = self.endpoint(&["warehouses"])?;
        self.send(self.request(Method::GET, url), "warehouses").await
    }
}
