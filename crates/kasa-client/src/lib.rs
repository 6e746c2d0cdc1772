//! # kasa-client: Local Receipt Store + Sync Engine
//!
//! The cashier-side half of Kasa POS: a persistent local receipt store the
//! cashier keeps working against while disconnected, and a background engine
//! that reconciles completed sales with the server exactly-once.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        kasa-client Data Flow                            │
//! │                                                                         │
//! │  cashier edits                                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  ReceiptStore (store.rs)                                        │    │
//! │  │  create / update / complete - totals via kasa-core::recalculate │    │
//! │  └──────────────┬──────────────────────────────────────────────────┘    │
//! │                 │ complete() = receipt + queue entry, one transaction   │
//! │                 ▼                                                       │
//! │  ┌─────────────────────────┐      ┌──────────────────────────────┐      │
//! │  │  KvStore (kv.rs)        │      │  SyncEngine (engine.rs)      │      │
//! │  │  receipts │ sync_queue  │ ◄──► │  30s interval + triggers     │      │
//! │  │  │ meta   (SQLite WAL)  │      │  one batch in flight, max    │      │
//! │  └─────────────────────────┘      └──────────────┬───────────────┘      │
//! │                                                  │ HTTP POST (10s)      │
//! │                                                  ▼                      │
//! │                                        kasa-server sync endpoint        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`kv`] - SQLite-backed partitioned key-value store
//! - [`store`] - Receipt lifecycle and sync queue operations
//! - [`engine`] - The background sync loop
//! - [`transport`] - The network seam (trait + reqwest implementation)
//! - [`config`] - Environment-driven sync configuration
//! - [`error`] - Store/transport/sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! let db = Database::new(DbConfig::new("./kasa-local.db")).await?;
//! let store = ReceiptStore::new(db.kv());
//!
//! // One-time legacy migration, guarded by a persisted flag
//! store.migrate_legacy_cart(legacy_snapshot.as_deref()).await?;
//!
//! let config = SyncConfig::from_env();
//! let transport = HttpTransport::new(&config)?;
//! let (engine, handle) = SyncEngine::new(store.clone(), transport, config);
//! tokio::spawn(engine.run());
//!
//! // Later, from a connectivity watcher:
//! handle.set_online(true);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod kv;
pub mod store;
pub mod transport;

pub use config::SyncConfig;
pub use engine::{CycleOutcome, SyncEngine, SyncEngineHandle};
pub use error::{StoreError, StoreResult, SyncError, SyncResult, TransportError};
pub use kv::{Database, DbConfig, KvStore, Partition};
pub use store::{ReceiptDraft, ReceiptPatch, ReceiptStore};
pub use transport::{HttpTransport, SyncTransport};
