//! # Engine Error Types
//!
//! Error types for the inventory sync engine and the inventory system
//! boundary.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Connectivity   │  │     Engine State        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │ ConnectionFailed│  │  AlreadySyncing         │ │
//! │  │  InvalidSetting │  │  Inventory(..)  │  │  RecordNotFound         │ │
//! │  │  ConfigLoad/Save│  │                 │  │  NotRetryable           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Item-level failures (InventoryError) never surface as SyncError from  │
//! │  a cycle. They are written into StockUpdateResult.error and the        │
//! │  record's failed_items instead.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use titan_core::{CoreError, ValidationError};

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Inventory Boundary Errors
// =============================================================================

/// Failure of a single call to the inventory system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// The item does not exist on the inventory side.
    #[error("Inventory item not found: {0}")]
    NotFound(String),

    /// The adjustment would take stock below zero.
    #[error("Insufficient stock for {0}")]
    InsufficientStock(String),

    /// Concurrent modification on the inventory side.
    #[error("Inventory conflict: {0}")]
    Conflict(String),

    /// The inventory system answered with an error status.
    #[error("Inventory rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request never got an answer.
    #[error("Inventory transport error: {0}")]
    Transport(String),

    #[error("Inventory request timed out: {0}")]
    Timeout(String),

    /// The answer could not be decoded.
    #[error("Invalid inventory response: {0}")]
    Decode(String),
}

impl InventoryError {
    /// Whether the same call may succeed later without any change.
    pub fn is_transient(&self) -> bool {
        match self {
            InventoryError::Transport(_)
            | InventoryError::Timeout(_)
            | InventoryError::Conflict(_) => true,
            InventoryError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for InventoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InventoryError::Timeout(err.to_string())
        } else if err.is_decode() {
            InventoryError::Decode(err.to_string())
        } else {
            InventoryError::Transport(err.to_string())
        }
    }
}

// =============================================================================
// Dispatch Error Codes
// =============================================================================

/// Machine-readable error code carried in dispatch responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnknownMethod,
    InvalidParams,
    AlreadySyncing,
    ConnectionFailed,
    InvalidSetting,
    NotFound,
    NotRetryable,
    DatabaseError,
    InventoryError,
    SerializationError,
    ConfigError,
    InternalError,
}

// =============================================================================
// Engine Errors
// =============================================================================

/// Engine error type covering every failure an operation can return.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// The probe could not reach the inventory system. No record was created.
    #[error("Inventory system unreachable: {0}")]
    ConnectionFailed(String),

    /// A remote call outside a cycle failed.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    // =========================================================================
    // Engine State Errors
    // =========================================================================
    /// Another cycle is in flight.
    #[error("A synchronization is already in progress")]
    AlreadySyncing,

    #[error("Sync record not found: {0}")]
    RecordNotFound(i64),

    /// Operation input failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Force-retry on a record that is not failed/partial or has no retries left.
    #[error("Sync record {id} cannot be retried: {reason}")]
    NotRetryable { id: i64, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A setting value was rejected. The previous value is kept.
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<titan_db::DbError> for SyncError {
    fn from(err: titan_db::DbError) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::InvalidSetting(err.to_string())
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidConfig(format!("invalid URL: {err}"))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if calling again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::AlreadySyncing => true,
            SyncError::Inventory(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidSetting(_)
                | SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
        )
    }

    /// The code reported to dispatch callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            SyncError::Inventory(InventoryError::NotFound(_)) => ErrorCode::NotFound,
            SyncError::Inventory(_) => ErrorCode::InventoryError,
            SyncError::AlreadySyncing => ErrorCode::AlreadySyncing,
            SyncError::RecordNotFound(_) => ErrorCode::NotFound,
            SyncError::InvalidInput(_) => ErrorCode::InvalidParams,
            SyncError::NotRetryable { .. } => ErrorCode::NotRetryable,
            SyncError::InvalidSetting(_) => ErrorCode::InvalidSetting,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_) => ErrorCode::ConfigError,
            SyncError::Database(_) => ErrorCode::DatabaseError,
            SyncError::Serialization(_) => ErrorCode::SerializationError,
            SyncError::Internal(_) => ErrorCode::InternalError,
        }
    }
}
