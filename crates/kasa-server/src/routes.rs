//! HTTP handlers: thin adapters between axum extractors and the service
//! layer.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use kasa_core::protocol::{SyncBatchRequest, SyncBatchResponse};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::registry::{normalize_company_id, CompanyIdentity};
use crate::services::receipts::{
    AssignCustomerRequest, CheckoutRequest, OpenReceiptsResponse, ReceiptViewResponse,
};
use crate::services::{receipts, sync};
use crate::AppState;

/// `POST /api/offline-receipts/sync` - the idempotent batch endpoint.
pub async fn sync_receipts(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SyncBatchRequest>,
) -> ApiResult<Json<SyncBatchResponse>> {
    if request.receipts.is_empty() {
        return Err(ApiError::Validation("receipts is required".into()));
    }

    let response = sync::process_batch(&state, user.id(), request).await;
    Ok(Json(response))
}

/// `POST /api/receipts` - create a fresh open receipt.
pub async fn create_receipt(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<(StatusCode, Json<ReceiptViewResponse>)> {
    let response = receipts::create_receipt(&state, user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /api/receipts/open` - the caller's open receipts (≥1 guaranteed).
pub async fn open_receipts(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<OpenReceiptsResponse>> {
    Ok(Json(receipts::open_receipts(&state, user).await?))
}

/// `PATCH /api/receipts/{id}/checkout`.
pub async fn checkout_receipt(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<ReceiptViewResponse>> {
    Ok(Json(receipts::checkout(&state, user, id, request).await?))
}

/// `DELETE /api/receipts/{id}` - open receipts only.
pub async fn delete_receipt(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<OpenReceiptsResponse>> {
    Ok(Json(receipts::delete_receipt(&state, user, id).await?))
}

/// `POST /api/receipts/{id}/reopen` - terminal back to open, same row.
pub async fn reopen_receipt(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ReceiptViewResponse>> {
    Ok(Json(receipts::reopen_receipt(&state, user, id).await?))
}

/// `PATCH /api/receipts/{id}/customer`.
pub async fn assign_customer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(request): Json<AssignCustomerRequest>,
) -> ApiResult<Json<ReceiptViewResponse>> {
    Ok(Json(receipts::assign_customer(&state, user, id, request).await?))
}

#[derive(Debug, Deserialize)]
pub struct CompanyLookupQuery {
    pub company_id: String,
}

/// `GET /api/registry/company?company_id=` - registry collaborator lookup.
pub async fn company_lookup(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<CompanyLookupQuery>,
) -> ApiResult<Json<CompanyIdentity>> {
    let company_id = normalize_company_id(&query.company_id)
        .ok_or_else(|| ApiError::Validation("Company ID must be 8 digits.".into()))?;

    let identity = state.registry().lookup(&company_id).await?;
    Ok(Json(identity))
}
