//! # Local Receipt Store
//!
//! Receipt lifecycle operations over the partitioned KV store.
//!
//! ## Receipt Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Local Receipt Lifecycle                             │
//! │                                                                         │
//! │  1. CREATE                                                              │
//! │     └── create() → LocalReceipt { state: Open, sync: NotNeeded }        │
//! │                                                                         │
//! │  2. EDIT (any number of times)                                          │
//! │     └── update() → items/adjustment merged, totals recomputed           │
//! │                                                                         │
//! │  3. COMPLETE (checkout)                                                 │
//! │     └── complete() → state: Completed, sync: Pending                    │
//! │         └── queue entry inserted IN THE SAME TRANSACTION                │
//! │                                                                         │
//! │  4. SYNC (background engine)                                            │
//! │     └── mark_syncing() → mark_synced() / mark_failed() → retry_sync()   │
//! │                                                                         │
//! │  KEY GUARANTEE: a receipt is never Completed without a queue entry -    │
//! │  both writes commit together or neither does.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Totals are never patched directly: every mutation re-prices the receipt
//! through the shared engine, so the preview the cashier sees is exactly what
//! the server will recompute.

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kasa_core::money::Money;
use kasa_core::pricing::{recalculate, PricingLine};
use kasa_core::protocol::ReceiptResult;
use kasa_core::types::{
    Adjustment, CheckoutMethod, CustomerRef, LocalReceipt, LocalReceiptLine, QueueStatus,
    ReceiptState, ReceiptSyncStatus, SyncQueueEntry,
};

use crate::error::StoreResult;
use crate::kv::{KvStore, Partition};

/// Meta flag marking the one-time legacy cart migration as done.
const LEGACY_MIGRATION_FLAG: &str = "legacy_cart_migrated_v1";

/// Fallback error text when the server rejects without a message.
const DEFAULT_SYNC_ERROR: &str = "Sync failed";

// =============================================================================
// Drafts & Patches
// =============================================================================

/// Input for creating a local receipt.
#[derive(Debug, Clone, Default)]
pub struct ReceiptDraft {
    /// Explicit id; generated (UUID v4) when absent.
    pub id: Option<String>,
    pub items: Vec<LocalReceiptLine>,
    pub customer: Option<CustomerRef>,
    pub adjustment: Option<Adjustment>,
    pub notes: Option<String>,
    /// Server transaction this receipt was forked from, if any.
    pub source_transaction_id: Option<i64>,
}

/// Partial update for a local receipt. `None` leaves a field untouched; the
/// nested options distinguish "set" from "clear".
#[derive(Debug, Clone, Default)]
pub struct ReceiptPatch {
    pub items: Option<Vec<LocalReceiptLine>>,
    pub customer: Option<Option<CustomerRef>>,
    pub adjustment: Option<Option<Adjustment>>,
    pub notes: Option<Option<String>>,
    pub source_transaction_id: Option<Option<i64>>,
}

// =============================================================================
// Receipt Store
// =============================================================================

/// Receipt operations over the local store.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    kv: KvStore,
}

impl ReceiptStore {
    pub fn new(kv: KvStore) -> Self {
        ReceiptStore { kv }
    }

    /// Creates a new open receipt with defaults and persists it.
    pub async fn create(&self, draft: ReceiptDraft) -> StoreResult<LocalReceipt> {
        let now = Utc::now();
        let id = draft.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        debug!(receipt_id = %id, "Creating local receipt");

        let mut receipt = LocalReceipt {
            id: id.clone(),
            state: ReceiptState::Open,
            sync_status: ReceiptSyncStatus::NotNeeded,
            items: draft.items,
            customer: draft.customer,
            adjustment: draft.adjustment,
            subtotal: Money::zero(),
            total: Money::zero(),
            notes: draft.notes,
            checkout_method: None,
            source_transaction_id: draft.source_transaction_id,
            server_transaction_id: None,
            server_transaction_code: None,
            sync_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        reprice(&mut receipt);

        self.kv.put(Partition::Receipts, &id, &receipt).await?;
        Ok(receipt)
    }

    /// Fetches one receipt.
    pub async fn get(&self, id: &str) -> StoreResult<Option<LocalReceipt>> {
        self.kv.get(Partition::Receipts, id).await
    }

    /// Merges a patch into an open or completed receipt and re-prices it.
    ///
    /// Returns `None` (no-op) when the id is absent.
    pub async fn update(&self, id: &str, patch: ReceiptPatch) -> StoreResult<Option<LocalReceipt>> {
        let Some(mut receipt) = self.get(id).await? else {
            return Ok(None);
        };

        apply_patch(&mut receipt, patch);
        receipt.updated_at = Utc::now();
        reprice(&mut receipt);

        self.kv.put(Partition::Receipts, id, &receipt).await?;
        Ok(Some(receipt))
    }

    /// Completes a receipt: applies the final patch, flips it to
    /// `Completed`/`Pending`, and inserts the matching queue entry.
    ///
    /// Both writes share one transaction - there is no reachable state where
    /// the receipt is completed but unqueued.
    pub async fn complete(
        &self,
        id: &str,
        checkout_method: CheckoutMethod,
        patch: ReceiptPatch,
    ) -> StoreResult<Option<LocalReceipt>> {
        let Some(mut receipt) = self.get(id).await? else {
            return Ok(None);
        };

        let now = Utc::now();

        apply_patch(&mut receipt, patch);
        receipt.state = ReceiptState::Completed;
        receipt.sync_status = ReceiptSyncStatus::Pending;
        receipt.checkout_method = Some(checkout_method);
        receipt.completed_at = Some(now);
        receipt.updated_at = now;
        reprice(&mut receipt);

        let entry = SyncQueueEntry {
            receipt_id: id.to_string(),
            status: QueueStatus::Pending,
            last_error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.kv.begin().await?;
        KvStore::put_in(&mut tx, Partition::Receipts, id, &receipt).await?;
        KvStore::put_in(&mut tx, Partition::SyncQueue, id, &entry).await?;
        tx.commit().await?;

        info!(receipt_id = %id, method = checkout_method.as_str(), "Receipt completed and queued");
        Ok(Some(receipt))
    }

    /// Deletes a receipt together with its queue entry.
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut tx = self.kv.begin().await?;
        KvStore::delete_in(&mut tx, Partition::Receipts, id).await?;
        KvStore::delete_in(&mut tx, Partition::SyncQueue, id).await?;
        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Open receipts, newest first by creation time.
    pub async fn list_open(&self) -> StoreResult<Vec<LocalReceipt>> {
        let mut receipts: Vec<LocalReceipt> = self.kv.list_all(Partition::Receipts).await?;
        receipts.retain(|r| r.state == ReceiptState::Open);
        receipts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(receipts)
    }

    /// Completed receipts that have not reconciled yet (pending, syncing or
    /// failed), newest first by update time.
    pub async fn list_unsynced_completed(&self) -> StoreResult<Vec<LocalReceipt>> {
        let mut receipts: Vec<LocalReceipt> = self.kv.list_all(Partition::Receipts).await?;
        receipts.retain(LocalReceipt::is_unsynced_completed);
        receipts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(receipts)
    }

    /// Receipts whose queue entry is `Pending`, newest first by queue update
    /// time. Queue entries whose receipt vanished are skipped.
    pub async fn list_pending_sync(&self) -> StoreResult<Vec<LocalReceipt>> {
        let mut queue: Vec<SyncQueueEntry> = self.kv.list_all(Partition::SyncQueue).await?;
        queue.retain(|e| e.status == QueueStatus::Pending);
        queue.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let mut receipts = Vec::with_capacity(queue.len());
        for entry in queue {
            match self.get(&entry.receipt_id).await? {
                Some(receipt) => receipts.push(receipt),
                None => warn!(receipt_id = %entry.receipt_id, "Queue entry without receipt"),
            }
        }
        Ok(receipts)
    }

    // =========================================================================
    // Sync Status Transitions
    // =========================================================================

    /// Marks the given receipts (and queue entries) as part of the batch in
    /// flight.
    pub async fn mark_syncing(&self, ids: &[String]) -> StoreResult<()> {
        let now = Utc::now();

        for id in ids {
            if let Some(mut entry) = self
                .kv
                .get::<SyncQueueEntry>(Partition::SyncQueue, id)
                .await?
            {
                entry.status = QueueStatus::Syncing;
                entry.updated_at = now;
                self.kv.put(Partition::SyncQueue, id, &entry).await?;
            }

            if let Some(mut receipt) = self.get(id).await? {
                receipt.sync_status = ReceiptSyncStatus::Syncing;
                receipt.updated_at = now;
                self.kv.put(Partition::Receipts, id, &receipt).await?;
            }
        }

        Ok(())
    }

    /// Records a successful sync verdict: stamps the server ids on the
    /// receipt and removes the queue entry.
    pub async fn mark_synced(&self, id: &str, result: &ReceiptResult) -> StoreResult<()> {
        let Some(mut receipt) = self.get(id).await? else {
            return Ok(());
        };

        receipt.sync_status = ReceiptSyncStatus::Synced;
        receipt.server_transaction_id = result.transaction_id;
        receipt.server_transaction_code = result.transaction_code.clone();
        receipt.sync_error = None;
        receipt.updated_at = Utc::now();

        let mut tx = self.kv.begin().await?;
        KvStore::put_in(&mut tx, Partition::Receipts, id, &receipt).await?;
        KvStore::delete_in(&mut tx, Partition::SyncQueue, id).await?;
        tx.commit().await?;

        info!(
            receipt_id = %id,
            transaction_id = ?result.transaction_id,
            "Receipt synced"
        );
        Ok(())
    }

    /// Records a failed sync attempt on both the queue entry (error +
    /// incremented retry count) and the receipt.
    pub async fn mark_failed(&self, id: &str, error: &str) -> StoreResult<()> {
        let now = Utc::now();
        let message = if error.is_empty() { DEFAULT_SYNC_ERROR } else { error };

        if let Some(mut entry) = self
            .kv
            .get::<SyncQueueEntry>(Partition::SyncQueue, id)
            .await?
        {
            entry.status = QueueStatus::Failed;
            entry.last_error = Some(message.to_string());
            entry.retry_count += 1;
            entry.updated_at = now;
            self.kv.put(Partition::SyncQueue, id, &entry).await?;
        }

        if let Some(mut receipt) = self.get(id).await? {
            receipt.sync_status = ReceiptSyncStatus::Failed;
            receipt.sync_error = Some(message.to_string());
            receipt.updated_at = now;
            self.kv.put(Partition::Receipts, id, &receipt).await?;
        }

        warn!(receipt_id = %id, error = %message, "Receipt sync failed");
        Ok(())
    }

    /// Re-queues a failed receipt for the next cycle: queue entry back to
    /// `Pending`, error cleared, retry count preserved.
    ///
    /// Returns `false` when the receipt no longer exists.
    pub async fn retry_sync(&self, id: &str) -> StoreResult<bool> {
        let Some(mut receipt) = self.get(id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let previous = self
            .kv
            .get::<SyncQueueEntry>(Partition::SyncQueue, id)
            .await?;

        let entry = SyncQueueEntry {
            receipt_id: id.to_string(),
            status: QueueStatus::Pending,
            last_error: None,
            retry_count: previous.as_ref().map(|e| e.retry_count).unwrap_or(0),
            created_at: previous.map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
        };

        receipt.sync_status = ReceiptSyncStatus::Pending;
        receipt.sync_error = None;
        receipt.updated_at = now;

        let mut tx = self.kv.begin().await?;
        KvStore::put_in(&mut tx, Partition::SyncQueue, id, &entry).await?;
        KvStore::put_in(&mut tx, Partition::Receipts, id, &receipt).await?;
        tx.commit().await?;

        Ok(true)
    }

    // =========================================================================
    // Legacy Migration
    // =========================================================================

    /// One-time conversion of the flat legacy cart snapshot into synthetic
    /// open receipts.
    ///
    /// Guarded by a persisted meta flag: once it has run (even over malformed
    /// input) it never runs again. Entries keyed `transaction:<id>` belonged
    /// to server-assigned receipts and are skipped; `transaction-code:`
    /// prefixes only contribute their suffix to the synthetic id.
    pub async fn migrate_legacy_cart(&self, raw_snapshot: Option<&str>) -> StoreResult<bool> {
        let already: Option<bool> = self.kv.get(Partition::Meta, LEGACY_MIGRATION_FLAG).await?;
        if already == Some(true) {
            return Ok(false);
        }

        if let Some(raw) = raw_snapshot {
            match serde_json::from_str::<LegacyCartSnapshot>(raw) {
                Ok(snapshot) => self.import_legacy_snapshot(snapshot).await?,
                Err(err) => {
                    // Malformed legacy state: the app stays usable, the flag
                    // still flips so this never re-runs.
                    warn!(error = %err, "Ignoring malformed legacy cart state");
                }
            }
        }

        self.kv
            .put(Partition::Meta, LEGACY_MIGRATION_FLAG, &true)
            .await?;
        Ok(true)
    }

    async fn import_legacy_snapshot(&self, snapshot: LegacyCartSnapshot) -> StoreResult<()> {
        let migrated_at = Utc::now();
        let mut migrated = 0usize;

        for (receipt_key, items) in snapshot.items_by_receipt {
            if items.is_empty() || receipt_key.starts_with("transaction:") {
                continue;
            }

            let suffix = receipt_key.trim_start_matches("transaction-code:");
            let id = format!("temp:migrated-{suffix}");
            if self.get(&id).await?.is_some() {
                continue;
            }

            let lines: Vec<LocalReceiptLine> = items
                .into_iter()
                .enumerate()
                .map(|(index, item)| item.into_line(index))
                .collect();

            let mut receipt = LocalReceipt {
                id: id.clone(),
                state: ReceiptState::Open,
                sync_status: ReceiptSyncStatus::NotNeeded,
                items: lines,
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
                created_at: migrated_at,
                updated_at: migrated_at,
                completed_at: None,
            };
            reprice(&mut receipt);

            self.kv.put(Partition::Receipts, &id, &receipt).await?;
            migrated += 1;
        }

        if migrated > 0 {
            info!(count = migrated, "Migrated legacy cart entries");
        }
        Ok(())
    }
}

// =============================================================================
// Pricing Glue
// =============================================================================

/// Re-prices a receipt in place through the shared engine.
///
/// VAT rates were already resolved when lines were added (catalog snapshot or
/// manual default), so only the money fields are taken from the engine
/// output; product bindings and VAT snapshots stay untouched.
fn reprice(receipt: &mut LocalReceipt) {
    let lines: Vec<PricingLine> = receipt
        .items
        .iter()
        .map(|item| PricingLine {
            product_id: None,
            product_name: item.product_name.clone(),
            packages: item.packages,
            quantity: item.quantity,
            base_unit_price: item.base_unit_price,
            explicit_vat_rate: item.vat_rate,
        })
        .collect();

    let outcome = recalculate(&lines, receipt.adjustment.as_ref(), &HashMap::new());

    for (item, priced) in receipt.items.iter_mut().zip(outcome.lines) {
        item.unit_price = priced.unit_price;
        item.total = priced.total;
    }
    receipt.subtotal = outcome.subtotal;
    receipt.total = outcome.total;
}

fn apply_patch(receipt: &mut LocalReceipt, patch: ReceiptPatch) {
    if let Some(items) = patch.items {
        receipt.items = items;
    }
    if let Some(customer) = patch.customer {
        receipt.customer = customer;
    }
    if let Some(adjustment) = patch.adjustment {
        receipt.adjustment = adjustment;
    }
    if let Some(notes) = patch.notes {
        receipt.notes = notes;
    }
    if let Some(source) = patch.source_transaction_id {
        receipt.source_transaction_id = source;
    }
}

// =============================================================================
// Legacy Cart Shapes
// =============================================================================

/// The flat pre-offline cart snapshot (`cashier-cart-v1`).
#[derive(Debug, Deserialize)]
struct LegacyCartSnapshot {
    #[serde(rename = "itemsByReceipt", default)]
    items_by_receipt: HashMap<String, Vec<LegacyCartItem>>,
}

#[derive(Debug, Deserialize)]
struct LegacyCartItem {
    #[serde(default)]
    product_id: Option<i64>,
    #[serde(default)]
    product: Option<LegacyCartProduct>,
    #[serde(default = "default_count")]
    packages: i64,
    #[serde(default = "default_count")]
    quantity: i64,
    #[serde(default)]
    unit_price: f64,
    #[serde(default)]
    vat_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LegacyCartProduct {
    #[serde(default)]
    name: Option<String>,
}

fn default_count() -> i64 {
    1
}

impl LegacyCartItem {
    fn into_line(self, index: usize) -> LocalReceiptLine {
        let name = self
            .product
            .and_then(|p| p.name)
            .unwrap_or_else(|| "Unknown product".to_string());
        let price = Money::from_major_units(self.unit_price);

        LocalReceiptLine {
            line_id: format!("legacy-{index}"),
            product_id: self.product_id.filter(|id| *id > 0),
            product_name: name,
            packages: self.packages.max(1),
            quantity: self.quantity.max(1),
            base_unit_price: price,
            unit_price: price,
            vat_rate: self.vat_rate.map(kasa_core::money::Rate::from_major_units),
            total: price.multiply_counts(self.packages.max(1), self.quantity.max(1)),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{Database, DbConfig};
    use kasa_core::money::Rate;
    use kasa_core::types::AdjustmentKind;

    async fn test_store() -> ReceiptStore {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        ReceiptStore::new(db.kv())
    }

    fn line(cents: i64, packages: i64, quantity: i64) -> LocalReceiptLine {
        LocalReceiptLine {
            line_id: Uuid::new_v4().to_string(),
            product_id: None,
            product_name: "Espresso".into(),
            packages,
            quantity,
            base_unit_price: Money::from_cents(cents),
            unit_price: Money::from_cents(cents),
            vat_rate: Some(Rate::from_bps(2100)),
            total: Money::zero(),
        }
    }

    #[tokio::test]
    async fn create_assigns_defaults_and_prices() {
        let store = test_store().await;

        let receipt = store
            .create(ReceiptDraft {
                items: vec![line(1000, 2, 3)],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(receipt.state, ReceiptState::Open);
        assert_eq!(receipt.sync_status, ReceiptSyncStatus::NotNeeded);
        assert_eq!(receipt.subtotal.cents(), 6000);
        assert_eq!(receipt.items[0].total.cents(), 6000);
        assert!(!receipt.id.is_empty());

        let stored = store.get(&receipt.id).await.unwrap().unwrap();
        assert_eq!(stored, receipt);
    }

    #[tokio::test]
    async fn update_merges_and_reprices() {
        let store = test_store().await;
        let receipt = store
            .create(ReceiptDraft {
                items: vec![line(1000, 1, 1)],
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = store
            .update(
                &receipt.id,
                ReceiptPatch {
                    adjustment: Some(Some(Adjustment::new(
                        AdjustmentKind::Discount,
                        Rate::from_bps(1000),
                    ))),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.items[0].unit_price.cents(), 900);
        assert_eq!(updated.total.cents(), 900);
        assert!(updated.updated_at >= receipt.updated_at);
    }

    #[tokio::test]
    async fn update_missing_is_noop_none() {
        let store = test_store().await;
        let result = store.update("missing", ReceiptPatch::default()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn complete_writes_receipt_and_queue_atomically() {
        let store = test_store().await;
        let receipt = store
            .create(ReceiptDraft {
                items: vec![line(500, 1, 2)],
                ..Default::default()
            })
            .await
            .unwrap();

        let completed = store
            .complete(&receipt.id, CheckoutMethod::Cash, ReceiptPatch::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(completed.state, ReceiptState::Completed);
        assert_eq!(completed.sync_status, ReceiptSyncStatus::Pending);
        assert_eq!(completed.checkout_method, Some(CheckoutMethod::Cash));
        assert!(completed.completed_at.is_some());

        let pending = store.list_pending_sync().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, receipt.id);
    }

    #[tokio::test]
    async fn projections_filter_and_sort() {
        let store = test_store().await;

        let first = store
            .create(ReceiptDraft {
                items: vec![line(100, 1, 1)],
                ..Default::default()
            })
            .await
            .unwrap();
        let second = store
            .create(ReceiptDraft {
                items: vec![line(200, 1, 1)],
                ..Default::default()
            })
            .await
            .unwrap();

        store
            .complete(&second.id, CheckoutMethod::Card, ReceiptPatch::default())
            .await
            .unwrap();

        let open = store.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, first.id);

        let unsynced = store.list_unsynced_completed().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, second.id);
    }

    #[tokio::test]
    async fn sync_transitions_roundtrip() {
        let store = test_store().await;
        let receipt = store
            .create(ReceiptDraft {
                items: vec![line(100, 1, 1)],
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .complete(&receipt.id, CheckoutMethod::Cash, ReceiptPatch::default())
            .await
            .unwrap();

        store.mark_syncing(&[receipt.id.clone()]).await.unwrap();
        let syncing = store.get(&receipt.id).await.unwrap().unwrap();
        assert_eq!(syncing.sync_status, ReceiptSyncStatus::Syncing);
        // Syncing receipts are no longer pending
        assert!(store.list_pending_sync().await.unwrap().is_empty());

        let result = ReceiptResult::synced(&receipt.id, 42, "UC260101000007");
        store.mark_synced(&receipt.id, &result).await.unwrap();

        let synced = store.get(&receipt.id).await.unwrap().unwrap();
        assert_eq!(synced.sync_status, ReceiptSyncStatus::Synced);
        assert_eq!(synced.server_transaction_id, Some(42));
        assert_eq!(synced.server_transaction_code.as_deref(), Some("UC260101000007"));
        // Queue entry removed
        assert!(store.list_pending_sync().await.unwrap().is_empty());
        assert!(store.list_unsynced_completed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_failed_then_retry_preserves_retry_count() {
        let store = test_store().await;
        let receipt = store
            .create(ReceiptDraft {
                items: vec![line(100, 1, 1)],
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .complete(&receipt.id, CheckoutMethod::Cash, ReceiptPatch::default())
            .await
            .unwrap();

        store.mark_syncing(&[receipt.id.clone()]).await.unwrap();
        store.mark_failed(&receipt.id, "boom").await.unwrap();
        store.mark_syncing(&[receipt.id.clone()]).await.unwrap();
        store.mark_failed(&receipt.id, "boom again").await.unwrap();

        let failed = store.get(&receipt.id).await.unwrap().unwrap();
        assert_eq!(failed.sync_status, ReceiptSyncStatus::Failed);
        assert_eq!(failed.sync_error.as_deref(), Some("boom again"));

        assert!(store.retry_sync(&receipt.id).await.unwrap());

        let retried = store.get(&receipt.id).await.unwrap().unwrap();
        assert_eq!(retried.sync_status, ReceiptSyncStatus::Pending);
        assert_eq!(retried.sync_error, None);

        let pending = store.list_pending_sync().await.unwrap();
        assert_eq!(pending.len(), 1);

        let entry: SyncQueueEntry = store
            .kv
            .get(Partition::SyncQueue, &receipt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.retry_count, 2);
        assert_eq!(entry.last_error, None);
    }

    #[tokio::test]
    async fn retry_missing_receipt_returns_false() {
        let store = test_store().await;
        assert!(!store.retry_sync("missing").await.unwrap());
    }

    #[tokio::test]
    async fn legacy_migration_runs_once() {
        let store = test_store().await;

        let raw = r#"{
            "itemsByReceipt": {
                "transaction-code:UC123": [
                    { "product": { "name": "Old item" }, "packages": 1,
                      "quantity": 2, "unit_price": 5.5, "vat_rate": 21 }
                ],
                "transaction:99": [
                    { "product": { "name": "Server-owned" }, "quantity": 1 }
                ],
                "transaction-code:EMPTY": []
            }
        }"#;

        assert!(store.migrate_legacy_cart(Some(raw)).await.unwrap());

        let open = store.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "temp:migrated-UC123");
        assert_eq!(open[0].items[0].product_name, "Old item");
        assert_eq!(open[0].subtotal.cents(), 1100);

        // Second run is a no-op even with new data
        assert!(!store.migrate_legacy_cart(Some(raw)).await.unwrap());
        assert_eq!(store.list_open().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn legacy_migration_swallows_malformed_state() {
        let store = test_store().await;

        assert!(store.migrate_legacy_cart(Some("not json at all")).await.unwrap());
        assert!(store.list_open().await.unwrap().is_empty());
        // Flag is set regardless
        assert!(!store.migrate_legacy_cart(None).await.unwrap());
    }
}
