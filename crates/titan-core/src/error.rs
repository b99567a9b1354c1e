//! # Domain Errors
//!
//! Error types for the sync domain model.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  CoreError (domain rules)                                              │
//! │  ├── UnknownSetting          "colour is not a sync setting"            │
//! │  ├── InvalidSettingValue     "enabled expects a boolean"               │
//! │  └── Validation(ValidationError)                                       │
//! │                                                                         │
//! │  ValidationError (boundary input)                                      │
//! │  ├── Required, MustBePositive, MustBeNonZero                           │
//! │  └── OutOfRange, InvalidFormat                                         │
//! │                                                                         │
//! │  Engine crates wrap CoreError into their own error enums.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors for the sync model.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key passed to a generic setting update is not recognized.
    #[error("Unknown sync setting: {key}")]
    UnknownSetting { key: String },

    /// Setting exists but the value has the wrong shape.
    #[error("Setting {key} expects {expected}")]
    InvalidSettingValue { key: String, expected: &'static str },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised at the boundary, before any record is written or any remote call
/// is made.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be zero.
    #[error("{field} must not be zero")]
    MustBeNonZero { field: String },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
