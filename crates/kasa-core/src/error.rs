//! # Error Types
//!
//! Domain-specific error types for kasa-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kasa-core errors (this file)                                           │
//! │  ├── CoreError        - General domain errors                           │
//! │  └── ValidationError  - Payload shape violations                        │
//! │                                                                         │
//! │  kasa-client errors                                                     │
//! │  ├── StoreError       - Local store / KV failures                       │
//! │  └── SyncError        - Sync engine / transport failures                │
//! │                                                                         │
//! │  kasa-server errors                                                     │
//! │  └── ApiError         - HTTP-facing taxonomy (422/404/409/...)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impls)
//! 2. Include context in messages (field names, ids)
//! 3. Errors are enum variants, never bare strings

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A receipt payload failed shape validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A status transition the state machine forbids.
    ///
    /// ## When This Occurs
    /// - Checking out a transaction that is not open
    /// - Deleting a terminal transaction
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },
}

// =============================================================================
// Validation Error
// =============================================================================

/// Payload shape violations.
///
/// One receipt payload failing validation rejects only that receipt; the
/// rest of a batch keeps processing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be at least 1 (packages, quantity).
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Money or rate value must not be negative.
    #[error("{field} must not be negative")]
    MustBeNonNegative { field: String },

    /// Value is not in the allowed set (checkout method, adjustment type).
    #[error("{field} must be one of: {allowed}")]
    NotAllowed { field: String, allowed: String },

    /// The payload itself could not be read as a receipt.
    #[error("receipt payload is malformed: {reason}")]
    Malformed { reason: String },
}

/// Result alias for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
