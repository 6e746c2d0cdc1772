//! # Receipt Lifecycle Service
//!
//! Server-side receipt operations: create, checkout, delete, reopen and
//! customer assignment, plus the always-one-open invariant.
//!
//! ## Status State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │      open ──── checkout (cash|card|order) ───► terminal                 │
//! │        ▲                                          │                     │
//! │        └────────────── reopen (same row) ─────────┘                     │
//! │                                                                         │
//! │  open → open    checkout: no-op is NOT allowed - only `open` rows       │
//! │                 check out; terminal rows answer 422 Conflict            │
//! │  reopen         flips status back on the SAME row, items untouched;     │
//! │                 reopening an already-open row is a no-op success        │
//! │  delete         only from open                                          │
//! │                                                                         │
//! │  After every checkout/delete the invariant is re-established: at        │
//! │  least one open transaction exists (auto-created when none remains).    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;

use kasa_core::pricing::recalculate;
use kasa_core::protocol::ItemPayload;
use kasa_core::types::{CheckoutMethod, TransactionStatus};
use kasa_core::validation::{validate_adjustment, validate_items};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::{TransactionDto, TransactionRecord};
use crate::registry::normalize_company_id;
use crate::repository::{NewTransactionItem, ProductRepository, TransactionRepository, TransactionTotals};
use crate::AppState;

const ONLY_OPEN_CHECKOUT: &str = "Only open receipts can be checked out.";
const ONLY_OPEN_DELETE: &str = "Only open receipts can be deleted.";
const ONLY_OPEN_UPDATE: &str = "Only open receipts can be updated.";

// =============================================================================
// Request / Response Shapes
// =============================================================================

/// Body of `PATCH /api/receipts/{id}/checkout`.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub checkout_method: String,
    #[serde(default)]
    pub adjustment_type: Option<String>,
    #[serde(default)]
    pub adjustment_percent: f64,
    /// Advisory only; recomputed server-side.
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub items: Vec<ItemPayload>,
}

/// Body of `PATCH /api/receipts/{id}/customer`.
#[derive(Debug, Deserialize)]
pub struct AssignCustomerRequest {
    #[serde(default)]
    pub clear_customer: bool,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub company_id: Option<String>,
}

/// A transaction plus the caller's refreshed open-receipt picture.
#[derive(Debug, Serialize)]
pub struct ReceiptViewResponse {
    pub transaction: TransactionDto,
    pub open_transactions: Vec<TransactionDto>,
    pub active_transaction_id: i64,
}

/// The open-receipt picture alone (delete, listing).
#[derive(Debug, Serialize)]
pub struct OpenReceiptsResponse {
    pub open_transactions: Vec<TransactionDto>,
    pub active_transaction_id: i64,
}

// =============================================================================
// Operations
// =============================================================================

/// Creates a fresh empty open receipt and returns the refreshed picture.
pub async fn create_receipt(state: &AppState, user: AuthUser) -> ApiResult<ReceiptViewResponse> {
    let transaction = state.transactions().create_open(user.id()).await?;
    let transaction_id = transaction.id;

    let (open_transactions, _) = open_picture(state, user).await?;
    Ok(ReceiptViewResponse {
        transaction: to_dto(state, transaction).await?,
        open_transactions,
        // The freshly created receipt becomes the active one
        active_transaction_id: transaction_id,
    })
}

/// The caller's open receipts; guarantees at least one exists.
pub async fn open_receipts(state: &AppState, user: AuthUser) -> ApiResult<OpenReceiptsResponse> {
    let (open_transactions, active_transaction_id) = open_picture(state, user).await?;
    Ok(OpenReceiptsResponse {
        open_transactions,
        active_transaction_id,
    })
}

/// Checks out an open receipt with the submitted items and adjustment.
pub async fn checkout(
    state: &AppState,
    user: AuthUser,
    transaction_id: i64,
    request: CheckoutRequest,
) -> ApiResult<ReceiptViewResponse> {
    let method = CheckoutMethod::parse(&request.checkout_method).ok_or_else(|| {
        ApiError::Validation("checkout_method must be one of: cash, card, order".into())
    })?;
    let adjustment = validate_adjustment(request.adjustment_type.as_deref(), request.adjustment_percent)?;
    let lines = validate_items(&request.items)?;

    let transactions = state.transactions();
    let record = transactions
        .get_owned(user.id(), transaction_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transaction".into()))?;
    if !record.status.is_open() {
        return Err(ApiError::Conflict(ONLY_OPEN_CHECKOUT.into()));
    }

    // Checkout references must be real, owned catalog products - unlike the
    // sync path there is no offline excuse for a stale id.
    let mut product_ids: Vec<i64> = lines.iter().filter_map(|l| l.product_id).collect();
    product_ids.sort_unstable();
    product_ids.dedup();
    let vat_map = state.products().vat_rates_for(user.id(), &product_ids).await?;
    if let Some(missing) = product_ids.iter().find(|id| !vat_map.contains_key(id)) {
        return Err(ApiError::Validation(format!(
            "items.product_id {missing} is not a known product"
        )));
    }

    let outcome = recalculate(&lines, adjustment.as_ref(), &vat_map);
    let totals = TransactionTotals::from_outcome(&outcome, adjustment);

    let mut tx = state.pool().begin().await?;

    TransactionRepository::delete_items_in(&mut tx, transaction_id).await?;
    for line in &outcome.lines {
        let product_id = match line.product_id {
            Some(id) => id,
            // Authoritative checkout: the promoted product is active at once.
            None => {
                ProductRepository::promote_in(
                    &mut tx,
                    user.id(),
                    &line.product_name,
                    line.vat_rate,
                    line.base_unit_price,
                    true,
                )
                .await?
            }
        };

        TransactionRepository::insert_item_in(
            &mut tx,
            transaction_id,
            &NewTransactionItem {
                product_id: Some(product_id),
                product_name: line.product_name.clone(),
                packages: line.packages,
                quantity: line.quantity,
                unit_price: line.unit_price,
                vat_rate: line.vat_rate,
                total: line.total,
            },
        )
        .await?;
    }

    let rows = TransactionRepository::checkout_in(
        &mut tx,
        user.id(),
        transaction_id,
        &totals,
        TransactionStatus::from(method),
    )
    .await?;
    if rows == 0 {
        // A concurrent request checked this receipt out first; dropping the
        // transaction rolls the item replacement back.
        return Err(ApiError::Conflict(ONLY_OPEN_CHECKOUT.into()));
    }

    tx.commit().await?;

    info!(
        user_id = user.id(),
        transaction_id,
        method = method.as_str(),
        total_cents = totals.total.cents(),
        "Receipt checked out"
    );

    view_response(state, user, transaction_id).await
}

/// Deletes an open receipt and re-establishes the open invariant.
pub async fn delete_receipt(
    state: &AppState,
    user: AuthUser,
    transaction_id: i64,
) -> ApiResult<OpenReceiptsResponse> {
    let transactions = state.transactions();
    let record = transactions
        .get_owned(user.id(), transaction_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transaction".into()))?;
    if !record.status.is_open() {
        return Err(ApiError::Conflict(ONLY_OPEN_DELETE.into()));
    }

    let rows = transactions.delete_open(user.id(), transaction_id).await?;
    if rows == 0 {
        return Err(ApiError::Conflict(ONLY_OPEN_DELETE.into()));
    }

    info!(user_id = user.id(), transaction_id, "Receipt deleted");
    open_receipts(state, user).await
}

/// Reopens a terminal receipt on the same row, items untouched.
pub async fn reopen_receipt(
    state: &AppState,
    user: AuthUser,
    transaction_id: i64,
) -> ApiResult<ReceiptViewResponse> {
    let transactions = state.transactions();
    let record = transactions
        .get_owned(user.id(), transaction_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transaction".into()))?;

    if !record.status.is_open() {
        let rows = transactions.reopen(user.id(), transaction_id).await?;
        if rows == 0 {
            // Lost a race with another reopen/delete; re-read below tells the
            // truth either way.
            return Err(ApiError::Conflict("Receipt changed concurrently.".into()));
        }
        info!(user_id = user.id(), transaction_id, "Receipt reopened");
    }
    // open → open is a no-op success

    view_response(state, user, transaction_id).await
}

/// Assigns, resolves or clears the customer of an open receipt.
///
/// An unknown company id goes through the registry collaborator; a customer
/// record is created from the returned identity. `LookupNotFound` and
/// `LookupUnavailable` surface distinctly.
pub async fn assign_customer(
    state: &AppState,
    user: AuthUser,
    transaction_id: i64,
    request: AssignCustomerRequest,
) -> ApiResult<ReceiptViewResponse> {
    let transactions = state.transactions();
    let record = transactions
        .get_owned(user.id(), transaction_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transaction".into()))?;
    if !record.status.is_open() {
        return Err(ApiError::Conflict(ONLY_OPEN_UPDATE.into()));
    }

    if request.clear_customer {
        transactions.set_customer(user.id(), transaction_id, None).await?;
        return view_response(state, user, transaction_id).await;
    }

    let customer_id = match (request.customer_id, request.company_id.as_deref()) {
        (Some(customer_id), _) => state
            .customers()
            .resolve_owned_id(user.id(), customer_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Customer".into()))?,

        (None, Some(raw_company_id)) => {
            let company_id = normalize_company_id(raw_company_id)
                .ok_or_else(|| ApiError::Validation("Company ID must be 8 digits.".into()))?;

            match state.customers().find_by_company_id(user.id(), &company_id).await? {
                Some(existing) => existing.id,
                None => {
                    let identity = state.registry().lookup(&company_id).await?;
                    state
                        .customers()
                        .insert_from_identity(user.id(), &identity)
                        .await?
                        .id
                }
            }
        }

        (None, None) => {
            return Err(ApiError::Validation(
                "Select an existing customer or provide a valid company ID.".into(),
            ));
        }
    };

    transactions
        .set_customer(user.id(), transaction_id, Some(customer_id))
        .await?;
    view_response(state, user, transaction_id).await
}

// =============================================================================
// Helpers
// =============================================================================

/// The open list plus the active id, with the ≥1-open invariant enforced.
async fn open_picture(
    state: &AppState,
    user: AuthUser,
) -> ApiResult<(Vec<TransactionDto>, i64)> {
    let transactions = state.transactions();
    let active = transactions.ensure_open_exists(user.id()).await?;

    let records = transactions.list_open(user.id()).await?;
    let mut dtos = Vec::with_capacity(records.len());
    for record in records {
        dtos.push(to_dto(state, record).await?);
    }
    Ok((dtos, active.id))
}

async fn view_response(
    state: &AppState,
    user: AuthUser,
    transaction_id: i64,
) -> ApiResult<ReceiptViewResponse> {
    let record = state
        .transactions()
        .get_owned(user.id(), transaction_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transaction".into()))?;
    let transaction = to_dto(state, record).await?;

    let (open_transactions, active_transaction_id) = open_picture(state, user).await?;
    Ok(ReceiptViewResponse {
        transaction,
        open_transactions,
        active_transaction_id,
    })
}

async fn to_dto(state: &AppState, record: TransactionRecord) -> ApiResult<TransactionDto> {
    let items = state.transactions().items(record.id).await?;
    Ok(TransactionDto::from_record(record, items))
}
