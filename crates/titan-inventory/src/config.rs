//! # Bridge Configuration
//!
//! Configuration for the inventory sync engine and the bridge binary.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment variables (TITAN_INVENTORY_*)     ← highest             │
//! │  2. Config file (<config dir>/inventory.toml)                           │
//! │  3. Built-in defaults                             ← lowest              │
//! │                                                                         │
//! │  The [sync] section only seeds the persisted settings the first time.   │
//! │  After that the sync_settings table is the source of truth.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # inventory.toml
//! [inventory]
//! base_url = "https://inventory.example.com/api/v1"
//! api_key = "secret"
//! connect_timeout_secs = 5
//! request_timeout_secs = 15
//!
//! [sync]
//! enabled = true
//! auto_update_on_sale = true
//! sync_interval_ms = 300000
//!
//! [retry]
//! max_retries = 5
//! initial_backoff_ms = 30000
//! max_backoff_secs = 3600
//! retention_days = 30
//! stale_pending_secs = 3600
//!
//! [reconciler]
//! max_concurrency = 8
//! page_size = 200
//!
//! [database]
//! path = "/var/lib/titan/titan-inventory.db"
//!
//! [server]
//! bind_addr = "127.0.0.1"
//! port = 8787
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use titan_core::{SyncSettings, DEFAULT_MAX_RETRIES, DEFAULT_RETENTION_DAYS, MAX_PAGE_SIZE};

const ENV_PREFIX: &str = "TITAN_INVENTORY_";

// =============================================================================
// Inventory Endpoint
// =============================================================================

/// Where and how to reach the inventory system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Base URL of the REST API (http:// or https://).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Upper bound for the connectivity probe (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for InventoryConfig {
    fn default() -> Self {
        InventoryConfig {
            base_url: default_base_url(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl InventoryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Initial Sync Settings
// =============================================================================

/// Values written by `initialize_settings` when nothing is persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDefaults {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub auto_update_on_sale: bool,

    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    titan_core::DEFAULT_SYNC_INTERVAL_MS
}

impl Default for SyncDefaults {
    fn default() -> Self {
        SyncDefaults {
            enabled: true,
            auto_update_on_sale: true,
            sync_interval_ms: default_sync_interval(),
        }
    }
}

impl SyncDefaults {
    pub fn to_settings(&self) -> SyncSettings {
        SyncSettings {
            enabled: self.enabled,
            auto_update_on_sale: self.auto_update_on_sale,
            sync_interval_ms: self.sync_interval_ms,
            last_sync: None,
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Retry ceiling, backoff curve and record housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after which a failed record is frozen until reset.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    /// Delay before the first retry (milliseconds). Doubles per attempt.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Age after which terminal records are purged (days).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// A `pending` record older than this (seconds) is considered interrupted.
    #[serde(default = "default_stale_pending")]
    pub stale_pending_secs: u64,
}

fn default_max_retries() -> i64 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff() -> u64 {
    30_000
}

fn default_max_backoff() -> u64 {
    3_600
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_stale_pending() -> u64 {
    3_600
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            retention_days: default_retention_days(),
            stale_pending_secs: default_stale_pending(),
        }
    }
}

// =============================================================================
// Reconciler Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Per-item inventory calls in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Page size when walking the inventory catalog.
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_page_size() -> i64 {
    200
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            max_concurrency: default_max_concurrency(),
            page_size: default_page_size(),
        }
    }
}

// =============================================================================
// Database & Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding records, settings and the POS product cache.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "titan", "pos")
        .map(|dirs| dirs.data_dir().join("titan-inventory.db"))
        .unwrap_or_else(|| PathBuf::from("titan-inventory.db"))
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_database_path(),
        }
    }
}

/// Listener for the dispatch server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Main Bridge Configuration
// =============================================================================

/// Complete configuration of the bridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub inventory: InventoryConfig,

    #[serde(default)]
    pub sync: SyncDefaults,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl BridgeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (inventory.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = url::Url::parse(&self.inventory.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidConfig(format!(
                "Inventory URL must start with http:// or https://, got: {}",
                self.inventory.base_url
            )));
        }

        if self.inventory.connect_timeout_secs == 0 || self.inventory.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "inventory timeouts must be greater than 0".into(),
            ));
        }

        if self.sync.sync_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sync_interval_ms must be greater than 0".into(),
            ));
        }

        if self.retry.max_retries < 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must not be negative".into(),
            ));
        }

        if self.retry.initial_backoff_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }

        if self.retry.max_backoff_secs.saturating_mul(1_000) < self.retry.initial_backoff_ms {
            return Err(SyncError::InvalidConfig(
                "max_backoff_secs must not be shorter than initial_backoff_ms".into(),
            ));
        }

        if self.reconciler.max_concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "max_concurrency must be greater than 0".into(),
            ));
        }

        if !(1..=MAX_PAGE_SIZE).contains(&self.reconciler.page_size) {
            return Err(SyncError::InvalidConfig(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok());
    }

    /// Applies overrides from `lookup`, which maps an unprefixed variable name
    /// (e.g. `BASE_URL`) to its value.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("BASE_URL") {
            debug!(url = %url, "Overriding inventory URL from environment");
            self.inventory.base_url = url;
        }

        if let Some(key) = lookup("API_KEY") {
            self.inventory.api_key = Some(key);
        }

        if let Some(path) = lookup("DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(addr) = lookup("BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(_) => warn!(port = %port, "Ignoring invalid port in environment"),
            }
        }

        if let Some(enabled) = lookup("SYNC_ENABLED") {
            match enabled.parse::<bool>() {
                Ok(on) => self.sync.enabled = on,
                Err(_) => warn!(value = %enabled, "Ignoring invalid SYNC_ENABLED in environment"),
            }
        }

        if let Some(interval) = lookup("SYNC_INTERVAL_MS") {
            match interval.parse::<u64>() {
                Ok(ms) => self.sync.sync_interval_ms = ms,
                Err(_) => warn!(value = %interval, "Ignoring invalid SYNC_INTERVAL_MS in environment"),
            }
        }

        if let Some(max) = lookup("MAX_RETRIES") {
            if let Ok(n) = max.parse::<i64>() {
                self.retry.max_retries = n;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "titan", "pos")
            .map(|dirs| dirs.config_dir().join("inventory.toml"))
    }
}
