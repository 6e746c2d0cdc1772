//! # Batch Reconciliation Service
//!
//! The server half of the offline receipt lifecycle.
//!
//! ## Per-Entry Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │             One Receipt Through the Sync Endpoint                       │
//! │                                                                         │
//! │  raw JSON entry                                                         │
//! │       │ parse + validate ──── fail ──► { rejected, validation_failed }  │
//! │       ▼                                                                 │
//! │  idempotency: (user_id, client_receipt_id) already recorded?            │
//! │       │ yes ──► { synced, existing id/code }  (no recomputation)        │
//! │       ▼                                                                 │
//! │  recompute totals with the pricing engine (client money = advisory)     │
//! │       ▼                                                                 │
//! │  ┌────────────────────── ONE SQL TRANSACTION ─────────────────────┐     │
//! │  │  source_transaction_id open & owned? → overwrite that row      │     │
//! │  │  otherwise                           → insert a new row        │     │
//! │  │  promote ad hoc products (inactive), replace all items         │     │
//! │  └────────────────────────────────────────────────────────────────┘     │
//! │       │ any error ──► { rejected, sync_failed }  (logged, retryable)    │
//! │       ▼                                                                 │
//! │  { synced, transaction_id, transaction_code }                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are strictly independent: a malformed or failing receipt never
//! aborts or rolls back its batch siblings.

use serde_json::Value;
use tracing::{error, info};

use kasa_core::pricing::recalculate;
use kasa_core::protocol::{
    ReceiptPayload, ReceiptResult, SyncBatchRequest, SyncBatchResponse,
    ERROR_CODE_SYNC_FAILED, ERROR_CODE_VALIDATION_FAILED,
};
use kasa_core::types::TransactionStatus;
use kasa_core::validation::{validate_receipt_payload, NormalizedReceipt};

use crate::error::ApiResult;
use crate::repository::{NewTransactionItem, ProductRepository, TransactionRepository, TransactionTotals};
use crate::AppState;

/// Message surfaced for unexpected persistence failures; detail stays in the
/// log.
const SYNC_FAILED_MESSAGE: &str = "Receipt sync failed. Please retry.";

/// Processes a sync batch, one verdict per entry, request order preserved.
pub async fn process_batch(
    state: &AppState,
    user_id: i64,
    request: SyncBatchRequest,
) -> SyncBatchResponse {
    let mut results = Vec::with_capacity(request.receipts.len());

    for (index, raw) in request.receipts.into_iter().enumerate() {
        results.push(process_entry(state, user_id, index, raw).await);
    }

    SyncBatchResponse { results }
}

async fn process_entry(state: &AppState, user_id: i64, index: usize, raw: Value) -> ReceiptResult {
    // Salvage the id for the verdict even when the entry is garbage.
    let fallback_id = raw
        .get("client_receipt_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("invalid:{index}"));

    let payload: ReceiptPayload = match serde_json::from_value(raw) {
        Ok(payload) => payload,
        Err(err) => {
            return ReceiptResult::rejected(
                fallback_id,
                ERROR_CODE_VALIDATION_FAILED,
                format!("receipt payload is malformed: {err}"),
            );
        }
    };

    let normalized = match validate_receipt_payload(&payload) {
        Ok(normalized) => normalized,
        Err(err) => {
            return ReceiptResult::rejected(fallback_id, ERROR_CODE_VALIDATION_FAILED, err.to_string());
        }
    };

    let client_receipt_id = normalized.client_receipt_id.clone();
    match reconcile(state, user_id, normalized).await {
        Ok((transaction_id, transaction_code)) => {
            ReceiptResult::synced(client_receipt_id, transaction_id, transaction_code)
        }
        Err(err) => {
            // Per-entry isolation: log the detail, reject this entry only.
            error!(
                user_id,
                client_receipt_id = %client_receipt_id,
                error = %err,
                "Receipt reconciliation failed"
            );
            ReceiptResult::rejected(client_receipt_id, ERROR_CODE_SYNC_FAILED, SYNC_FAILED_MESSAGE)
        }
    }
}

/// Reconciles one validated receipt into the canonical store.
async fn reconcile(
    state: &AppState,
    user_id: i64,
    receipt: NormalizedReceipt,
) -> ApiResult<(i64, String)> {
    let transactions = state.transactions();

    // Idempotency short-circuit: the sale was already recorded, return the
    // same verdict without recomputing anything.
    if let Some(existing) = transactions
        .find_by_client_receipt_id(user_id, &receipt.client_receipt_id)
        .await?
    {
        info!(
            user_id,
            client_receipt_id = %receipt.client_receipt_id,
            transaction_id = existing.id,
            "Duplicate sync, returning recorded transaction"
        );
        return Ok((existing.id, existing.transaction_code));
    }

    // Authoritative recomputation. Only products that exist and belong to
    // this user make it into the VAT map; everything else prices as ad hoc.
    let mut product_ids: Vec<i64> = receipt.lines.iter().filter_map(|l| l.product_id).collect();
    product_ids.sort_unstable();
    product_ids.dedup();
    let vat_map = state.products().vat_rates_for(user_id, &product_ids).await?;

    let outcome = recalculate(&receipt.lines, receipt.adjustment.as_ref(), &vat_map);
    let totals = TransactionTotals::from_outcome(&outcome, receipt.adjustment);
    let status = TransactionStatus::from(receipt.checkout_method);

    // Customer resolution: never attach another tenant's customer. An
    // unresolvable reference survives as a note instead.
    let referenced_customer = receipt.customer_ref.as_ref().and_then(|c| c.id);
    let customer_id = match referenced_customer {
        Some(id) => state.customers().resolve_owned_id(user_id, id).await?,
        None => None,
    };
    let offline_name = receipt.customer_ref.as_ref().and_then(|c| c.name.as_deref());
    let notes = build_notes(receipt.notes.as_deref(), customer_id, offline_name);

    let mut tx = state.pool().begin().await?;

    // Merge-by-source: an offline receipt that began life as a
    // server-assigned open transaction overwrites that row instead of
    // inserting a duplicate. A source that is gone or no longer open falls
    // back to a fresh insert.
    let source = match receipt.source_transaction_id {
        Some(source_id) => {
            TransactionRepository::find_open_owned_in(&mut tx, user_id, source_id).await?
        }
        None => None,
    };

    let (transaction_id, transaction_code) = match source {
        Some(source) => {
            TransactionRepository::delete_items_in(&mut tx, source.id).await?;
            TransactionRepository::overwrite_synced_in(
                &mut tx,
                user_id,
                source.id,
                &receipt.client_receipt_id,
                customer_id,
                &totals,
                status,
                notes.as_deref(),
            )
            .await?;
            (source.id, source.transaction_code)
        }
        None => {
            TransactionRepository::insert_synced_in(
                &mut tx,
                user_id,
                &receipt.client_receipt_id,
                customer_id,
                &totals,
                status,
                notes.as_deref(),
            )
            .await?
        }
    };

    for line in &outcome.lines {
        let product_id = match line.product_id {
            Some(id) => id,
            // Background-sync promotions are inactive until reviewed.
            None => {
                ProductRepository::promote_in(
                    &mut tx,
                    user_id,
                    &line.product_name,
                    line.vat_rate,
                    line.base_unit_price,
                    false,
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

    tx.commit().await?;

    info!(
        user_id,
        transaction_id,
        transaction_code = %transaction_code,
        "Offline receipt reconciled"
    );
    Ok((transaction_id, transaction_code))
}

/// Folds an unresolvable offline customer name into the notes.
fn build_notes(
    notes: Option<&str>,
    customer_id: Option<i64>,
    offline_name: Option<&str>,
) -> Option<String> {
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());

    let offline_name = match (customer_id, offline_name) {
        // Customer resolved, or nothing to preserve
        (Some(_), _) | (_, None) => return notes.map(str::to_string),
        (None, Some(name)) => name,
    };

    let offline_note = format!("Offline customer: {offline_name}");
    match notes {
        Some(existing) => Some(format!("{existing}\n{offline_note}")),
        None => Some(offline_note),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_untouched_when_customer_resolved() {
        assert_eq!(
            build_notes(Some("call before delivery"), Some(7), Some("Jane")),
            Some("call before delivery".to_string())
        );
        assert_eq!(build_notes(None, Some(7), Some("Jane")), None);
    }

    #[test]
    fn offline_name_appends_to_notes() {
        assert_eq!(
            build_notes(None, None, Some("Jane Offline")),
            Some("Offline customer: Jane Offline".to_string())
        );
        assert_eq!(
            build_notes(Some("urgent"), None, Some("Jane Offline")),
            Some("urgent\nOffline customer: Jane Offline".to_string())
        );
    }

    #[test]
    fn blank_notes_collapse_to_none() {
        assert_eq!(build_notes(Some("   "), None, None), None);
    }
}
