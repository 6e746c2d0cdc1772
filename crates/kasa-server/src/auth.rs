//! # Authenticated User Extraction
//!
//! Session management is an external collaborator: a fronting auth layer
//! validates the session and injects the caller's user id as the `x-user-id`
//! header. This extractor is the only place the server touches it - every
//! query below this point is scoped by the extracted id.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub i64);

impl AuthUser {
    #[inline]
    pub const fn id(&self) -> i64 {
        self.0
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}
