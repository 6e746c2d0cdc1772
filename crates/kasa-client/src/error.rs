//! # Client Error Types
//!
//! Error types for the local store and the sync engine.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite / serde error                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError ← local store operations                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError ← the engine loop catches and logs; nothing escapes it.      │
//! │              Transport failures land on queue entries as last_error.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Store Error
// =============================================================================

/// Local store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database file could not be opened or the pool is gone.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored JSON value could not be (de)serialized.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => StoreError::ConnectionFailed("Pool is closed".to_string()),
            sqlx::Error::PoolTimedOut => {
                StoreError::ConnectionFailed("Connection pool exhausted".to_string())
            }
            other => StoreError::QueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Transport Error
// =============================================================================

/// Failures of the sync batch POST itself.
///
/// Every variant is treated the same way by the engine: everything unsynced
/// is marked failed with a network reason and stays visible for retry. The
/// variants exist for logging fidelity.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request exceeded the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure (DNS, refused, TLS, ...).
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The server answered with a non-success status.
    #[error("Server returned HTTP {status}")]
    Status { status: u16 },

    /// The response body was not a valid batch response.
    #[error("Invalid response body: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// Sync Error
// =============================================================================

/// Sync engine errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store failure during a cycle.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Transport failure during a cycle.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Unit Tests
// =============================================================================
