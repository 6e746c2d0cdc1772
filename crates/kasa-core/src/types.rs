//! # Domain Types
//!
//! Core domain types shared by the cashier client and the server.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  CLIENT SIDE                          SERVER SIDE                       │
//! │  ┌──────────────────┐                 ┌─────────────────────┐           │
//! │  │  LocalReceipt    │   sync batch    │  TransactionStatus  │           │
//! │  │  ReceiptState    │ ──────────────► │  open/cash/card/    │           │
//! │  │  ReceiptSyncStatus│                │  order              │           │
//! │  │  SyncQueueEntry  │ ◄────────────── │                     │           │
//! │  └──────────────────┘    verdicts     └─────────────────────┘           │
//! │                                                                         │
//! │  SHARED: CheckoutMethod, AdjustmentKind, Adjustment, CustomerRef        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sync Status State Machine
//! `sync_status` only moves forward:
//! `not_needed → pending → syncing → {synced | failed}`, and `failed →
//! pending` on retry. A receipt never reaches `synced`/`failed` without a
//! batch having been in flight for it (`syncing`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{Money, Rate};

// =============================================================================
// Checkout Method
// =============================================================================

/// How a completed receipt was settled.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMethod {
    Cash,
    Card,
    /// Invoiced order, settled later.
    Order,
}

impl CheckoutMethod {
    /// Parses the wire representation (`"cash"`, `"card"`, `"order"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(CheckoutMethod::Cash),
            "card" => Some(CheckoutMethod::Card),
            "order" => Some(CheckoutMethod::Order),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            CheckoutMethod::Cash => "cash",
            CheckoutMethod::Card => "card",
            CheckoutMethod::Order => "order",
        }
    }
}

// =============================================================================
// Transaction Status
// =============================================================================

/// Status of a canonical server transaction.
///
/// `Open` accepts edits; the three terminal statuses are the checkout
/// methods. A terminal transaction can be flipped back to `Open` by an
/// explicit reopen, on the same row.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Open,
    Cash,
    Card,
    Order,
}

impl TransactionStatus {
    #[inline]
    pub const fn is_open(&self) -> bool {
        matches!(self, TransactionStatus::Open)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Open => "open",
            TransactionStatus::Cash => "cash",
            TransactionStatus::Card => "card",
            TransactionStatus::Order => "order",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(TransactionStatus::Open),
            "cash" => Some(TransactionStatus::Cash),
            "card" => Some(TransactionStatus::Card),
            "order" => Some(TransactionStatus::Order),
            _ => None,
        }
    }
}

impl From<CheckoutMethod> for TransactionStatus {
    fn from(method: CheckoutMethod) -> Self {
        match method {
            CheckoutMethod::Cash => TransactionStatus::Cash,
            CheckoutMethod::Card => TransactionStatus::Card,
            CheckoutMethod::Order => TransactionStatus::Order,
        }
    }
}

impl Default for TransactionStatus {
    fn default() -> Self {
        TransactionStatus::Open
    }
}

// =============================================================================
// Adjustment
// =============================================================================

/// Kind of receipt-wide percentage adjustment.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Discount,
    Surcharge,
}

impl AdjustmentKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "discount" => Some(AdjustmentKind::Discount),
            "surcharge" => Some(AdjustmentKind::Surcharge),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            AdjustmentKind::Discount => "discount",
            AdjustmentKind::Surcharge => "surcharge",
        }
    }
}

/// A transaction-wide percentage adjustment applied to every line's unit
/// price. `percent` is expected in `[0, 100]`; non-positive percents leave
/// prices untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub kind: AdjustmentKind,
    pub percent: Rate,
}

impl Adjustment {
    pub const fn new(kind: AdjustmentKind, percent: Rate) -> Self {
        Adjustment { kind, percent }
    }
}

// =============================================================================
// Receipt State & Sync Status
// =============================================================================

/// Lifecycle state of a local receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptState {
    /// Still accepting item edits.
    Open,
    /// Checked out; awaiting (or done with) sync.
    Completed,
}

/// Synchronization status of a local receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptSyncStatus {
    /// Open receipts never sync.
    NotNeeded,
    /// Completed, queued, waiting for the next cycle.
    Pending,
    /// Part of the batch currently in flight.
    Syncing,
    /// Reconciled with the server; superseded by its transaction.
    Synced,
    /// Last attempt failed; visible for manual retry.
    Failed,
}

impl ReceiptSyncStatus {
    /// Whether the status machine permits moving to `next`.
    ///
    /// Transitions only move forward; `Failed → Pending` is the retry edge.
    /// Self-transitions are allowed (idempotent marks).
    pub fn can_transition_to(&self, next: ReceiptSyncStatus) -> bool {
        use ReceiptSyncStatus::*;

        if *self == next {
            return true;
        }

        matches!(
            (*self, next),
            (NotNeeded, Pending)
                | (Pending, Syncing)
                | (Syncing, Synced)
                | (Syncing, Failed)
                | (Failed, Pending)
        )
    }
}

/// Status of a sync queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Syncing,
    Failed,
}

// =============================================================================
// Customer Reference
// =============================================================================

/// Snapshot of the customer attached to a receipt.
///
/// `id` references a server-side customer; `name` is a display snapshot so
/// the receipt stays meaningful even when the id cannot be resolved (e.g. the
/// customer was created on another account).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRef {
    pub id: Option<i64>,
    pub name: Option<String>,
}

// =============================================================================
// Local Receipt
// =============================================================================

/// A line on a local receipt.
///
/// Product details are frozen at add-time (snapshot pattern): the sale stays
/// correct even if the catalog product changes later. `unit_price` is the
/// post-adjustment price; `base_unit_price` is what the cashier keyed in or
/// the catalog price at add-time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalReceiptLine {
    /// Stable per-line id, unique within the receipt.
    pub line_id: String,
    /// Catalog product, if the line is bound to one.
    pub product_id: Option<i64>,
    pub product_name: String,
    pub packages: i64,
    pub quantity: i64,
    pub base_unit_price: Money,
    /// Post-adjustment unit price.
    pub unit_price: Money,
    /// Resolved VAT rate snapshot; `None` for ad hoc lines that rely on the
    /// manual default.
    pub vat_rate: Option<Rate>,
    /// `packages × quantity × unit_price`.
    pub total: Money,
}

/// A client-owned receipt in the local store.
///
/// The `id` is client-generated (UUID v4) and doubles as the idempotency key
/// on the sync wire. Once synced the receipt is logically superseded by its
/// server transaction but retained locally, tagged `Synced`, for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalReceipt {
    pub id: String,
    pub state: ReceiptState,
    pub sync_status: ReceiptSyncStatus,
    pub items: Vec<LocalReceiptLine>,
    pub customer: Option<CustomerRef>,
    pub adjustment: Option<Adjustment>,
    pub subtotal: Money,
    pub total: Money,
    pub notes: Option<String>,
    /// Set at completion time.
    pub checkout_method: Option<CheckoutMethod>,
    /// Server transaction this receipt originated from, when it began life as
    /// a server-assigned open transaction. Lets the server merge instead of
    /// duplicating.
    pub source_transaction_id: Option<i64>,
    /// Populated by a successful sync.
    pub server_transaction_id: Option<i64>,
    pub server_transaction_code: Option<String>,
    /// Last sync error, mirrored from the queue entry.
    pub sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LocalReceipt {
    /// Whether this receipt is completed but not yet reconciled.
    pub fn is_unsynced_completed(&self) -> bool {
        self.state == ReceiptState::Completed
            && matches!(
                self.sync_status,
                ReceiptSyncStatus::Pending
                    | ReceiptSyncStatus::Failed
                    | ReceiptSyncStatus::Syncing
            )
    }
}

// =============================================================================
// Sync Queue Entry
// =============================================================================

/// An entry in the sync queue, one-to-one with a completed local receipt.
///
/// Removed once the receipt is synced; failures keep the entry with
/// `last_error` and an incremented `retry_count` so nothing is dropped
/// silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Equals the receipt id (the store keys the queue partition by it).
    pub receipt_id: String,
    pub status: QueueStatus,
    pub last_error: Option<String>,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_method_parse() {
        assert_eq!(CheckoutMethod::parse("cash"), Some(CheckoutMethod::Cash));
        assert_eq!(CheckoutMethod::parse("card"), Some(CheckoutMethod::Card));
        assert_eq!(CheckoutMethod::parse("order"), Some(CheckoutMethod::Order));
        assert_eq!(CheckoutMethod::parse("cheque"), None);
    }

    #[test]
    fn status_from_checkout_method() {
        assert_eq!(
            TransactionStatus::from(CheckoutMethod::Cash),
            TransactionStatus::Cash
        );
        assert!(!TransactionStatus::Card.is_open());
        assert!(TransactionStatus::default().is_open());
    }

    #[test]
    fn sync_status_moves_forward_only() {
        use ReceiptSyncStatus::*;

        assert!(NotNeeded.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Syncing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));

        // No skipping past syncing, no going backwards
        assert!(!Pending.can_transition_to(Synced));
        assert!(!Pending.can_transition_to(NotNeeded));
        assert!(!Synced.can_transition_to(Pending));
        assert!(!Synced.can_transition_to(Failed));
        assert!(!NotNeeded.can_transition_to(Syncing));
    }

    #[test]
    fn sync_status_self_transition_is_noop() {
        use ReceiptSyncStatus::*;

        for status in [NotNeeded, Pending, Syncing, Synced, Failed] {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn unsynced_completed_detection() {
        let receipt = sample_receipt(ReceiptState::Completed, ReceiptSyncStatus::Failed);
        assert!(receipt.is_unsynced_completed());

        let open = sample_receipt(ReceiptState::Open, ReceiptSyncStatus::NotNeeded);
        assert!(!open.is_unsynced_completed());

        let synced = sample_receipt(ReceiptState::Completed, ReceiptSyncStatus::Synced);
        assert!(!synced.is_unsynced_completed());
    }

    fn sample_receipt(state: ReceiptState, sync_status: ReceiptSyncStatus) -> LocalReceipt {
        let now = Utc::now();
        LocalReceipt {
            id: "r-1".into(),
            state,
            sync_status,
            items: vec![],
            customer: None,
            adjustment: None,
            subtotal: Money::zero(),
            total: Money::zero(),
            notes: None,
            checkout_method: None,
            source_transaction_id: None,
            server_transaction_id: None,
            server_transaction_code: None,
            sync_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
