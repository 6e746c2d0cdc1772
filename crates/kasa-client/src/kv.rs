//! # Partitioned Key-Value Store
//!
//! The local persistence layer: an embedded SQLite database exposing three
//! named partitions with async get/put/delete/list-all.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Local Persisted Layout                               │
//! │                                                                         │
//! │  kv_entries (partition, key) ──► value (JSON)                           │
//! │                                                                         │
//! │  "receipts"   │ <receipt id>  │ LocalReceipt                            │
//! │  "sync_queue" │ <receipt id>  │ SyncQueueEntry                          │
//! │  "meta"       │ <flag name>   │ arbitrary marker value                  │
//! │                                                                         │
//! │  The queue partition is keyed BY RECEIPT ID: one queue entry per        │
//! │  completed receipt, removed once synced.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! WAL journaling is enabled so the sync loop's reads never block the
//! cashier's writes, and a crash mid-write cannot corrupt the store.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Embedded migrations from the crate's `migrations/` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

// =============================================================================
// Partitions
// =============================================================================

/// Named partitions of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Local receipts, keyed by receipt id.
    Receipts,
    /// Sync queue entries, keyed by receipt id.
    SyncQueue,
    /// Singleton flags (migration markers etc.), keyed by flag name.
    Meta,
}

impl Partition {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Partition::Receipts => "receipts",
            Partition::SyncQueue => "sync_queue",
            Partition::Meta => "meta",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Local database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("./kasa-local.db").max_connections(4);
/// let db = Database::new(config).await?;
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Connection acquire timeout.
    pub connect_timeout: Duration,

    /// Whether to run migrations on connect.
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a configuration for the given file path; the file is created
    /// on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 4,
            connect_timeout: Duration::from_secs(30),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// An isolated in-memory database, for tests.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            // In-memory databases exist per-connection
            max_connections: 1,
            connect_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the local database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the local database and runs migrations.
    pub async fn new(config: DbConfig) -> StoreResult<Self> {
        info!(path = %config.database_path.display(), "Opening local store");

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs pending migrations. Idempotent.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        debug!("Checking for pending local store migrations");
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Returns a key-value view over the pool.
    pub fn kv(&self) -> KvStore {
        KvStore {
            pool: self.pool.clone(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        info!("Closing local store");
        self.pool.close().await;
    }

    /// True when the store can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// KV Store
// =============================================================================

/// Async key-value operations over the named partitions.
///
/// Values are serde-JSON. For multi-partition atomic writes (complete +
/// enqueue), begin a transaction with [`KvStore::begin`] and use the
/// `*_in` variants.
#[derive(Debug, Clone)]
pub struct KvStore {
    pool: SqlitePool,
}

impl KvStore {
    /// Reads and deserializes one value.
    pub async fn get<T: DeserializeOwned>(
        &self,
        partition: Partition,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM kv_entries WHERE partition = ?1 AND key = ?2")
                .bind(partition.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Serializes and upserts one value.
    pub async fn put<T: Serialize>(
        &self,
        partition: Partition,
        key: &str,
        value: &T,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        upsert(&self.pool, partition, key, &json).await?;
        Ok(())
    }

    /// Deletes one value. Missing keys are a no-op.
    pub async fn delete(&self, partition: Partition, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv_entries WHERE partition = ?1 AND key = ?2")
            .bind(partition.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reads every value in a partition.
    ///
    /// Ordering is storage order; callers sort by their own timestamps.
    pub async fn list_all<T: DeserializeOwned>(&self, partition: Partition) -> StoreResult<Vec<T>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT value FROM kv_entries WHERE partition = ?1")
                .bind(partition.as_str())
                .fetch_all(&self.pool)
                .await?;

        let mut values = Vec::with_capacity(rows.len());
        for (json,) in rows {
            values.push(serde_json::from_str(&json)?);
        }
        Ok(values)
    }

    /// Begins a store-wide transaction for atomic multi-partition writes.
    pub async fn begin(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Upserts inside an open transaction.
    pub async fn put_in<T: Serialize>(
        tx: &mut Transaction<'static, Sqlite>,
        partition: Partition,
        key: &str,
        value: &T,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        upsert(&mut **tx, partition, key, &json).await?;
        Ok(())
    }

    /// Deletes inside an open transaction.
    pub async fn delete_in(
        tx: &mut Transaction<'static, Sqlite>,
        partition: Partition,
        key: &str,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv_entries WHERE partition = ?1 AND key = ?2")
            .bind(partition.as_str())
            .bind(key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

async fn upsert<'e, E>(executor: E, partition: Partition, key: &str, json: &str) -> sqlx::Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO kv_entries (partition, key, value, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (partition, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(partition.as_str())
    .bind(key)
    .bind(json)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
