//! # API Error Types
//!
//! The HTTP-facing error taxonomy.
//!
//! ## Status Mapping
//! ```text
//! Validation        → 422  malformed request shape
//! Conflict          → 422  state machine violation (checkout on non-open, …)
//! NotFound          → 404  entity absent or not owned by the caller
//! Unauthorized      → 401  no authenticated user id
//! LookupNotFound    → 404  registry confirms the company does not exist
//! LookupUnavailable → 502  registry transport failure
//! Database/Internal → 500  logged in full, surfaced generically
//! ```
//!
//! Internal detail never leaks to clients: 5xx responses carry a generic
//! message while the full error goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use kasa_core::ValidationError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request shape.
    #[error("{0}")]
    Validation(String),

    /// The transaction is not in a state that allows the operation.
    #[error("{0}")]
    Conflict(String),

    /// Entity absent, or owned by another user (indistinguishable on
    /// purpose).
    #[error("{0} not found")]
    NotFound(String),

    /// No authenticated user id on the request.
    #[error("Unauthenticated")]
    Unauthorized,

    /// The registry confirmed the company does not exist.
    #[error("Company was not found in the registry")]
    LookupNotFound,

    /// The registry could not be reached.
    #[error("Company lookup failed: {0}")]
    LookupUnavailable(String),

    /// Database failure.
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    /// Anything else.
    #[error("Internal server error")]
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(_) | ApiError::Conflict(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            ApiError::NotFound(_) | ApiError::LookupNotFound => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::LookupUnavailable(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ApiError::Database(err) => {
                error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                error!(detail = %detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { message })).into_response()
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_422() {
        let response = ApiError::Conflict("Only open receipts can be checked out.".into())
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn database_error_is_generic() {
        let err = ApiError::Database(sqlx::Error::RowNotFound);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn lookup_errors_are_distinct() {
        assert_eq!(
            ApiError::LookupNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::LookupUnavailable("timeout".into())
                .into_response()
                .status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
