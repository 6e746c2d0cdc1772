//! # Sync Engine
//!
//! The background loop that drains the sync queue against the server.
//!
//! ## Cycle Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Cycle                                       │
//! │                                                                         │
//! │  interval tick ─┐                                                       │
//! │  connectivity ──┼──► sync_cycle()                                       │
//! │  manual kick ───┘        │                                              │
//! │                          ├── offline? ───────────► skip                 │
//! │                          ├── cycle in flight? ───► skip (no queueing)   │
//! │                          │                                              │
//! │                          ▼                                              │
//! │              list_pending_sync() ── empty ──────► idle                  │
//! │                          │                                              │
//! │                          ▼                                              │
//! │              mark_syncing(ids) → build batch → POST (bounded timeout)   │
//! │                          │                                              │
//! │            ┌─────────────┴──────────────┐                               │
//! │            ▼                            ▼                               │
//! │     per-receipt verdicts         transport failure                      │
//! │     synced   → mark_synced       every unsynced completed receipt       │
//! │     rejected → mark_failed       → mark_failed("Network error …")       │
//! │     missing  → mark_failed                                              │
//! │                                                                         │
//! │  The loop NEVER propagates an error - failures land on queue entries,   │
//! │  visible for retry. No backoff: fixed interval + manual kick.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrency: triggers can race the interval, so the in-flight guard is an
//! explicit `tokio::sync::Mutex` owned by the engine - concurrent entries
//! collapse into a no-op via `try_lock`, they never queue up extra cycles.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use kasa_core::protocol::{
    CustomerRefPayload, ItemPayload, ReceiptPayload, SyncBatchRequest, SyncResultStatus,
};
use kasa_core::types::LocalReceipt;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::store::ReceiptStore;
use crate::transport::SyncTransport;

/// Failure reason recorded when the batch POST itself fails.
const NETWORK_ERROR_REASON: &str = "Network error during sync";

/// Failure reason for queued ids the server did not answer for.
const NO_RESULT_REASON: &str = "No sync result returned by server";

// =============================================================================
// Cycle Outcome
// =============================================================================

/// What one sync cycle did. Mostly useful for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Device known offline; nothing attempted.
    SkippedOffline,
    /// Another cycle was in flight; collapsed into a no-op.
    SkippedInFlight,
    /// Queue was empty.
    Idle,
    /// Batch posted; per-receipt verdicts applied.
    Completed { synced: usize, failed: usize },
    /// The POST itself failed; unsynced completed receipts marked failed.
    TransportFailed { marked_failed: usize },
}

// =============================================================================
// Handle
// =============================================================================

/// Control handle for a running engine.
#[derive(Debug, Clone)]
pub struct SyncEngineHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    online: Arc<AtomicBool>,
}

impl SyncEngineHandle {
    /// Records a connectivity change. Coming back online kicks a cycle.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if online {
            self.kick();
        }
    }

    /// Requests an eager cycle (manual retry button, checkout just happened).
    ///
    /// Redundant kicks collapse: the channel holds one pending trigger at
    /// most.
    pub fn kick(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Asks the engine loop to stop after the current cycle.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The background sync engine. Construct once, `run()` as a spawned task.
pub struct SyncEngine<T: SyncTransport> {
    store: ReceiptStore,
    transport: T,
    config: SyncConfig,
    /// The in-flight guard (see module docs).
    in_flight: Mutex<()>,
    online: Arc<AtomicBool>,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates an engine and its control handle.
    pub fn new(store: ReceiptStore, transport: T, config: SyncConfig) -> (Self, SyncEngineHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let online = Arc::new(AtomicBool::new(true));

        let engine = SyncEngine {
            store,
            transport,
            config,
            in_flight: Mutex::new(()),
            online: online.clone(),
            trigger_rx,
            shutdown_rx,
        };

        let handle = SyncEngineHandle {
            trigger_tx,
            shutdown_tx,
            online,
        };

        (engine, handle)
    }

    /// Runs the engine loop until shutdown.
    ///
    /// Starts with an eager cycle (there may be receipts left over from the
    /// previous run), then alternates between the fixed interval and
    /// connectivity/manual triggers.
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!("Sync engine disabled by configuration");
            return;
        }

        info!(
            interval_secs = self.config.sync_interval.as_secs(),
            "Sync engine starting"
        );

        self.cycle_and_log().await;

        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so the eager cycle
        // above is not doubled.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.cycle_and_log().await;
                }

                Some(()) = self.trigger_rx.recv() => {
                    debug!("Sync cycle triggered");
                    self.cycle_and_log().await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync engine shutting down");
                    break;
                }
            }
        }
    }

    async fn cycle_and_log(&self) {
        match self.sync_cycle().await {
            Ok(CycleOutcome::Completed { synced, failed }) => {
                info!(synced, failed, "Sync cycle completed");
            }
            Ok(CycleOutcome::TransportFailed { marked_failed }) => {
                warn!(marked_failed, "Sync cycle hit a transport failure");
            }
            Ok(_) => {}
            // The loop must survive and retry next cycle.
            Err(err) => error!(error = %err, "Sync cycle failed"),
        }
    }

    /// Executes one sync cycle. Public so a manual "sync now" action (or a
    /// test) can run it directly; the in-flight guard applies either way.
    pub async fn sync_cycle(&self) -> SyncResult<CycleOutcome> {
        if !self.online.load(Ordering::SeqCst) {
            debug!("Offline, skipping sync cycle");
            return Ok(CycleOutcome::SkippedOffline);
        }

        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Sync cycle already in flight, skipping");
            return Ok(CycleOutcome::SkippedInFlight);
        };

        let pending = self.store.list_pending_sync().await?;
        if pending.is_empty() {
            return Ok(CycleOutcome::Idle);
        }

        let ids: Vec<String> = pending.iter().map(|r| r.id.clone()).collect();
        self.store.mark_syncing(&ids).await?;

        let request =
            SyncBatchRequest::from_payloads(pending.iter().map(build_payload).collect());

        debug!(receipts = ids.len(), "Posting sync batch");

        match self.transport.post_batch(&request).await {
            Ok(response) => {
                let mut synced = 0;
                let mut failed = 0;
                let mut answered: HashSet<&str> = HashSet::new();

                for result in &response.results {
                    answered.insert(result.client_receipt_id.as_str());

                    if result.status == SyncResultStatus::Synced {
                        self.store.mark_synced(&result.client_receipt_id, result).await?;
                        synced += 1;
                    } else {
                        let message = result.message.as_deref().unwrap_or("Sync rejected");
                        self.store.mark_failed(&result.client_receipt_id, message).await?;
                        failed += 1;
                    }
                }

                for id in ids.iter().filter(|id| !answered.contains(id.as_str())) {
                    self.store.mark_failed(id, NO_RESULT_REASON).await?;
                    failed += 1;
                }

                Ok(CycleOutcome::Completed { synced, failed })
            }

            Err(err) => {
                warn!(error = %err, "Sync batch POST failed");

                let unsynced = self.store.list_unsynced_completed().await?;
                let marked_failed = unsynced.len();
                for receipt in unsynced {
                    self.store.mark_failed(&receipt.id, NETWORK_ERROR_REASON).await?;
                }

                Ok(CycleOutcome::TransportFailed { marked_failed })
            }
        }
    }
}

// =============================================================================
// Batch Building
// =============================================================================

/// Maps a completed local receipt to its wire payload.
fn build_payload(receipt: &LocalReceipt) -> ReceiptPayload {
    ReceiptPayload {
        client_receipt_id: receipt.id.clone(),
        client_created_at: Some(receipt.created_at.to_rfc3339()),
        checkout_method: receipt
            .checkout_method
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        source_transaction_id: receipt.source_transaction_id,
        subtotal: Some(receipt.subtotal.to_major_units()),
        total: Some(receipt.total.to_major_units()),
        adjustment_type: receipt.adjustment.map(|a| a.kind.as_str().to_string()),
        adjustment_percent: receipt
            .adjustment
            .map(|a| a.percent.to_major_units())
            .unwrap_or(0.0),
        customer_ref: receipt.customer.as_ref().map(|c| CustomerRefPayload {
            id: c.id,
            name: c.name.clone(),
        }),
        notes: receipt.notes.clone(),
        items: receipt
            .items
            .iter()
            .map(|item| ItemPayload {
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                packages: item.packages,
                quantity: item.quantity,
                base_unit_price: item.base_unit_price.to_major_units(),
                unit_price: item.unit_price.to_major_units(),
                vat_rate: item.vat_rate.map(|r| r.to_major_units()),
                total: Some(item.total.to_major_units()),
            })
            .collect(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use kasa_core::money::Money;
    use kasa_core::protocol::{ReceiptResult, SyncBatchResponse, ERROR_CODE_VALIDATION_FAILED};
    use kasa_core::types::{CheckoutMethod, LocalReceiptLine, ReceiptSyncStatus};

    use crate::error::TransportError;
    use crate::kv::{Database, DbConfig};
    use crate::store::{ReceiptDraft, ReceiptPatch};

    /// Scripted transport: pops one canned response per call and records
    /// every request it saw.
    struct FakeTransport {
        responses: StdMutex<VecDeque<Result<SyncBatchResponse, TransportError>>>,
        requests: StdMutex<Vec<SyncBatchRequest>>,
        delay: Option<Duration>,
    }

    impl FakeTransport {
        fn new(responses: Vec<Result<SyncBatchResponse, TransportError>>) -> Self {
            FakeTransport {
                responses: StdMutex::new(responses.into()),
                requests: StdMutex::new(Vec::new()),
                delay: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl SyncTransport for FakeTransport {
        async fn post_batch(
            &self,
            request: &SyncBatchRequest,
        ) -> Result<SyncBatchResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Timeout))
        }
    }

    async fn store_with_completed(n: usize) -> (ReceiptStore, Vec<String>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = ReceiptStore::new(db.kv());
        let mut ids = Vec::new();

        for i in 0..n {
            let receipt = store
                .create(ReceiptDraft {
                    items: vec![LocalReceiptLine {
                        line_id: format!("l{i}"),
                        product_id: None,
                        product_name: format!("Item {i}"),
                        packages: 1,
                        quantity: 1,
                        base_unit_price: Money::from_cents(1000),
                        unit_price: Money::from_cents(1000),
                        vat_rate: None,
                        total: Money::zero(),
                    }],
                    ..Default::default()
                })
                .await
                .unwrap();
            store
                .complete(&receipt.id, CheckoutMethod::Cash, ReceiptPatch::default())
                .await
                .unwrap();
            ids.push(receipt.id);
        }

        (store, ids)
    }

    fn engine_with(
        store: ReceiptStore,
        transport: FakeTransport,
    ) -> SyncEngine<FakeTransport> {
        let config = SyncConfig::new("http://localhost:0");
        SyncEngine::new(store, transport, config).0
    }

    #[tokio::test]
    async fn idle_when_queue_empty() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = ReceiptStore::new(db.kv());
        let engine = engine_with(store, FakeTransport::new(vec![]));

        assert_eq!(engine.sync_cycle().await.unwrap(), CycleOutcome::Idle);
        assert_eq!(engine.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn offline_skips_without_touching_queue() {
        let (store, ids) = store_with_completed(1).await;
        let engine = engine_with(store, FakeTransport::new(vec![]));
        engine.online.store(false, Ordering::SeqCst);

        assert_eq!(
            engine.sync_cycle().await.unwrap(),
            CycleOutcome::SkippedOffline
        );
        let receipt = engine.store.get(&ids[0]).await.unwrap().unwrap();
        assert_eq!(receipt.sync_status, ReceiptSyncStatus::Pending);
    }

    #[tokio::test]
    async fn successful_cycle_applies_verdicts() {
        let (store, ids) = store_with_completed(2).await;

        // First receipt synced, second rejected
        let response = SyncBatchResponse {
            results: vec![
                ReceiptResult::synced(&ids[0], 10, "UC260101000010"),
                ReceiptResult::rejected(&ids[1], ERROR_CODE_VALIDATION_FAILED, "items is required"),
            ],
        };
        let engine = engine_with(store, FakeTransport::new(vec![Ok(response)]));

        assert_eq!(
            engine.sync_cycle().await.unwrap(),
            CycleOutcome::Completed { synced: 1, failed: 1 }
        );

        let synced = engine.store.get(&ids[0]).await.unwrap().unwrap();
        assert_eq!(synced.sync_status, ReceiptSyncStatus::Synced);
        assert_eq!(synced.server_transaction_id, Some(10));

        let rejected = engine.store.get(&ids[1]).await.unwrap().unwrap();
        assert_eq!(rejected.sync_status, ReceiptSyncStatus::Failed);
        assert_eq!(rejected.sync_error.as_deref(), Some("items is required"));
    }

    #[tokio::test]
    async fn unanswered_ids_fail_with_no_result_reason() {
        let (store, ids) = store_with_completed(2).await;

        // Server only answers for one of the two
        let response = SyncBatchResponse {
            results: vec![ReceiptResult::synced(&ids[0], 10, "UC260101000010")],
        };
        let engine = engine_with(store, FakeTransport::new(vec![Ok(response)]));

        assert_eq!(
            engine.sync_cycle().await.unwrap(),
            CycleOutcome::Completed { synced: 1, failed: 1 }
        );

        let missing = engine.store.get(&ids[1]).await.unwrap().unwrap();
        assert_eq!(missing.sync_status, ReceiptSyncStatus::Failed);
        assert_eq!(
            missing.sync_error.as_deref(),
            Some("No sync result returned by server")
        );
    }

    #[tokio::test]
    async fn transport_failure_marks_all_unsynced_completed() {
        let (store, ids) = store_with_completed(2).await;
        let engine = engine_with(
            store,
            FakeTransport::new(vec![Err(TransportError::Timeout)]),
        );

        assert_eq!(
            engine.sync_cycle().await.unwrap(),
            CycleOutcome::TransportFailed { marked_failed: 2 }
        );

        for id in &ids {
            let receipt = engine.store.get(id).await.unwrap().unwrap();
            assert_eq!(receipt.sync_status, ReceiptSyncStatus::Failed);
            assert_eq!(
                receipt.sync_error.as_deref(),
                Some("Network error during sync")
            );
        }

        // A retry makes the receipt eligible for the next cycle again
        assert!(engine.store.retry_sync(&ids[0]).await.unwrap());
        assert_eq!(engine.store.list_pending_sync().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_cycles_collapse() {
        let (store, ids) = store_with_completed(1).await;

        let response = SyncBatchResponse {
            results: vec![ReceiptResult::synced(&ids[0], 10, "UC260101000010")],
        };
        let transport =
            FakeTransport::new(vec![Ok(response)]).with_delay(Duration::from_millis(50));
        let engine = engine_with(store, transport);

        let (first, second) = tokio::join!(engine.sync_cycle(), engine.sync_cycle());

        let outcomes = [first.unwrap(), second.unwrap()];
        assert!(outcomes.contains(&CycleOutcome::SkippedInFlight));
        assert!(outcomes.contains(&CycleOutcome::Completed { synced: 1, failed: 0 }));
        // Exactly one POST went out
        assert_eq!(engine.transport.request_count(), 1);
    }

    #[tokio::test]
    async fn payload_carries_normalized_items() {
        let (store, ids) = store_with_completed(1).await;
        let receipt = store.get(&ids[0]).await.unwrap().unwrap();

        let payload = build_payload(&receipt);
        assert_eq!(payload.client_receipt_id, ids[0]);
        assert_eq!(payload.checkout_method, "cash");
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].base_unit_price, 10.0);
        assert_eq!(payload.items[0].vat_rate, None);
        assert_eq!(payload.subtotal, Some(10.0));
    }
}
