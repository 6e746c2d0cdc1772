//! # Sync Wire Protocol
//!
//! JSON shapes exchanged between the cashier client and the sync endpoint.
//!
//! ## Batch Round Trip
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CLIENT                                  SERVER                         │
//! │                                                                         │
//! │  SyncBatchRequest                                                       │
//! │  { receipts: [ReceiptPayload, …] }  ──►  per-entry validate/reconcile   │
//! │                                                                         │
//! │  SyncBatchResponse                                                      │
//! │  { results: [ReceiptResult, …] }    ◄──  one verdict per receipt        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Money fields travel as plain JSON numbers in major units (`10.99`); both
//! sides convert through [`Money`](crate::money::Money) at this boundary.
//! All client-submitted money fields are advisory - the server recomputes.
//!
//! The request carries receipts as raw JSON values so one malformed entry can
//! be rejected individually instead of failing deserialization of the whole
//! batch.

use serde::{Deserialize, Serialize};

// =============================================================================
// Error Codes
// =============================================================================

/// Receipt payload failed shape validation. Not retryable as-is.
pub const ERROR_CODE_VALIDATION_FAILED: &str = "validation_failed";

/// Server-side persistence failed for this entry. Retryable.
pub const ERROR_CODE_SYNC_FAILED: &str = "sync_failed";

// =============================================================================
// Request
// =============================================================================

/// The batch request body.
///
/// Entries stay `serde_json::Value` at this layer: the endpoint must process
/// each receipt independently, so a type error inside one entry must not
/// abort the others. Use [`SyncBatchRequest::from_payloads`] on the sending
/// side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatchRequest {
    pub receipts: Vec<serde_json::Value>,
}

impl SyncBatchRequest {
    /// Builds a request from typed payloads.
    pub fn from_payloads(payloads: Vec<ReceiptPayload>) -> Self {
        SyncBatchRequest {
            receipts: payloads
                .into_iter()
                .map(|p| serde_json::to_value(p).expect("receipt payload serializes"))
                .collect(),
        }
    }
}

/// One receipt in a sync batch.
///
/// `checkout_method` and `adjustment_type` are strings at this layer; they
/// are parsed into domain enums during per-entry validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptPayload {
    /// The idempotency key (client-generated receipt id).
    pub client_receipt_id: String,
    #[serde(default)]
    pub client_created_at: Option<String>,
    pub checkout_method: String,
    #[serde(default)]
    pub source_transaction_id: Option<i64>,
    /// Advisory only; recomputed server-side.
    #[serde(default)]
    pub subtotal: Option<f64>,
    /// Advisory only; recomputed server-side.
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub adjustment_type: Option<String>,
    #[serde(default)]
    pub adjustment_percent: f64,
    #[serde(default)]
    pub customer_ref: Option<CustomerRefPayload>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<ItemPayload>,
}

/// Customer reference snapshot on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerRefPayload {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// One item line on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPayload {
    #[serde(default)]
    pub product_id: Option<i64>,
    pub product_name: String,
    pub packages: i64,
    pub quantity: i64,
    pub base_unit_price: f64,
    /// Advisory only; recomputed server-side.
    pub unit_price: f64,
    #[serde(default)]
    pub vat_rate: Option<f64>,
    /// Advisory only; recomputed server-side.
    #[serde(default)]
    pub total: Option<f64>,
}

// =============================================================================
// Response
// =============================================================================

/// The batch response body: one result per submitted receipt, request order
/// preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatchResponse {
    pub results: Vec<ReceiptResult>,
}

/// Verdict for one receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncResultStatus {
    Synced,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptResult {
    pub client_receipt_id: String,
    pub status: SyncResultStatus,
    #[serde(default)]
    pub transaction_id: Option<i64>,
    #[serde(default)]
    pub transaction_code: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ReceiptResult {
    /// A successful reconciliation verdict.
    pub fn synced(
        client_receipt_id: impl Into<String>,
        transaction_id: i64,
        transaction_code: impl Into<String>,
    ) -> Self {
        ReceiptResult {
            client_receipt_id: client_receipt_id.into(),
            status: SyncResultStatus::Synced,
            transaction_id: Some(transaction_id),
            transaction_code: Some(transaction_code.into()),
            error_code: None,
            message: None,
        }
    }

    /// A per-entry rejection; the rest of the batch continues.
    pub fn rejected(
        client_receipt_id: impl Into<String>,
        error_code: &str,
        message: impl Into<String>,
    ) -> Self {
        ReceiptResult {
            client_receipt_id: client_receipt_id.into(),
            status: SyncResultStatus::Rejected,
            transaction_id: None,
            transaction_code: None,
            error_code: Some(error_code.to_string()),
            message: Some(message.into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_from_payloads_roundtrips() {
        let payload = ReceiptPayload {
            client_receipt_id: "temp:1".into(),
            client_created_at: None,
            checkout_method: "cash".into(),
            source_transaction_id: None,
            subtotal: Some(10.0),
            total: Some(10.0),
            adjustment_type: None,
            adjustment_percent: 0.0,
            customer_ref: None,
            notes: None,
            items: vec![ItemPayload {
                product_id: None,
                product_name: "Coffee".into(),
                packages: 1,
                quantity: 1,
                base_unit_price: 10.0,
                unit_price: 10.0,
                vat_rate: None,
                total: Some(10.0),
            }],
        };

        let request = SyncBatchRequest::from_payloads(vec![payload]);
        assert_eq!(request.receipts.len(), 1);

        let parsed: ReceiptPayload =
            serde_json::from_value(request.receipts[0].clone()).unwrap();
        assert_eq!(parsed.client_receipt_id, "temp:1");
        assert_eq!(parsed.items[0].product_name, "Coffee");
    }

    #[test]
    fn malformed_entry_still_deserializes_as_batch() {
        // A wrong-typed entry must survive request deserialization so the
        // endpoint can reject it individually.
        let body = serde_json::json!({
            "receipts": [
                { "client_receipt_id": 42, "items": "not-an-array" },
                { "client_receipt_id": "temp:ok", "checkout_method": "cash",
                  "items": [] }
            ]
        });

        let request: SyncBatchRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.receipts.len(), 2);
        assert!(serde_json::from_value::<ReceiptPayload>(request.receipts[0].clone()).is_err());
        assert!(serde_json::from_value::<ReceiptPayload>(request.receipts[1].clone()).is_ok());
    }

    #[test]
    fn result_constructors() {
        let ok = ReceiptResult::synced("temp:1", 7, "UC260101000042");
        assert_eq!(ok.status, SyncResultStatus::Synced);
        assert_eq!(ok.transaction_id, Some(7));

        let bad = ReceiptResult::rejected("temp:2", ERROR_CODE_VALIDATION_FAILED, "items missing");
        assert_eq!(bad.status, SyncResultStatus::Rejected);
        assert_eq!(bad.error_code.as_deref(), Some("validation_failed"));
        assert_eq!(bad.transaction_id, None);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncResultStatus::Synced).unwrap(),
            "\"synced\""
        );
        assert_eq!(
            serde_json::to_string(&SyncResultStatus::Rejected).unwrap(),
            "\"rejected\""
        );
    }
}
