//! # Transaction Repository
//!
//! Database operations for canonical transactions and their items.
//!
//! ## Status Machine at the SQL Level
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │               Conditional Updates, Not Check-Then-Write                 │
//! │                                                                         │
//! │  checkout:  UPDATE … SET status = <method> WHERE … AND status = 'open'  │
//! │  delete:    DELETE …                      WHERE … AND status = 'open'   │
//! │  reopen:    UPDATE … SET status = 'open'  WHERE … AND status != 'open'  │
//! │                                                                         │
//! │  Every mutation re-checks the status in its WHERE clause and the        │
//! │  caller inspects rows_affected: zero rows means a concurrent request    │
//! │  won the race and the operation surfaces a conflict instead of          │
//! │  silently double-writing.                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Items follow the replace-all pattern: every checkout or sync of a
//! transaction deletes its items and re-inserts the normalized list; items
//! are never patched in place.

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use kasa_core::money::{Money, Rate};
use kasa_core::pricing::PricingOutcome;
use kasa_core::types::{Adjustment, TransactionStatus};

use crate::error::ApiResult;
use crate::models::{TransactionItemRecord, TransactionRecord};

const SELECT_TRANSACTION: &str = r#"
    SELECT id, user_id, client_receipt_id, transaction_code, customer_id,
           subtotal_cents, discount_cents, adjustment_type,
           adjustment_percent_bps, adjustment_amount_cents, total_cents,
           status, notes, created_at, updated_at
    FROM transactions
"#;

// =============================================================================
// Write Parameter Bundles
// =============================================================================

/// Monetary fields written on checkout/sync, derived from a pricing outcome.
#[derive(Debug, Clone)]
pub struct TransactionTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub adjustment: Option<Adjustment>,
    pub adjustment_amount: Money,
    pub total: Money,
}

impl TransactionTotals {
    pub fn from_outcome(outcome: &PricingOutcome, adjustment: Option<Adjustment>) -> Self {
        TransactionTotals {
            subtotal: outcome.subtotal,
            discount: outcome.discount,
            adjustment,
            adjustment_amount: outcome.adjustment_amount,
            total: outcome.total,
        }
    }
}

/// One normalized item to insert (product already resolved/promoted).
#[derive(Debug, Clone)]
pub struct NewTransactionItem {
    pub product_id: Option<i64>,
    pub product_name: String,
    pub packages: i64,
    pub quantity: i64,
    pub unit_price: Money,
    pub vat_rate: Rate,
    pub total: Money,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for transaction database operations.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches a transaction owned by the user.
    pub async fn get_owned(&self, user_id: i64, id: i64) -> ApiResult<Option<TransactionRecord>> {
        let sql = format!("{SELECT_TRANSACTION} WHERE id = ?1 AND user_id = ?2");
        let record = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Idempotency lookup: the transaction already recorded for this client
    /// receipt, if any.
    pub async fn find_by_client_receipt_id(
        &self,
        user_id: i64,
        client_receipt_id: &str,
    ) -> ApiResult<Option<TransactionRecord>> {
        let sql = format!("{SELECT_TRANSACTION} WHERE user_id = ?1 AND client_receipt_id = ?2");
        let record = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(user_id)
            .bind(client_receipt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// The user's open transactions, newest first.
    pub async fn list_open(&self, user_id: i64) -> ApiResult<Vec<TransactionRecord>> {
        let sql = format!(
            "{SELECT_TRANSACTION} WHERE user_id = ?1 AND status = 'open' \
             ORDER BY created_at DESC, id DESC"
        );
        let records = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Items of a transaction, insertion order.
    pub async fn items(&self, transaction_id: i64) -> ApiResult<Vec<TransactionItemRecord>> {
        let items = sqlx::query_as::<_, TransactionItemRecord>(
            r#"
            SELECT id, transaction_id, product_id, product_name, packages,
                   quantity, unit_price_cents, vat_rate_bps, total_cents,
                   created_at
            FROM transaction_items
            WHERE transaction_id = ?1
            ORDER BY id
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    // =========================================================================
    // Open-Transaction Invariant
    // =========================================================================

    /// Creates a fresh empty open transaction.
    pub async fn create_open(&self, user_id: i64) -> ApiResult<TransactionRecord> {
        let now = Utc::now();
        let code = generate_transaction_code();

        debug!(user_id, code = %code, "Creating open transaction");

        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                user_id, client_receipt_id, transaction_code, customer_id,
                subtotal_cents, discount_cents, adjustment_type,
                adjustment_percent_bps, adjustment_amount_cents, total_cents,
                status, notes, created_at, updated_at
            ) VALUES (?1, NULL, ?2, NULL, 0, 0, NULL, 0, 0, 0, 'open', NULL, ?3, ?3)
            "#,
        )
        .bind(user_id)
        .bind(&code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        let record = self
            .get_owned(user_id, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok(record)
    }

    /// Returns the newest open transaction, creating one when none exists.
    ///
    /// Every user has at least one open transaction at all times; this is
    /// re-checked on read and after any delete/checkout that may have
    /// consumed the last one.
    pub async fn ensure_open_exists(&self, user_id: i64) -> ApiResult<TransactionRecord> {
        let sql = format!(
            "{SELECT_TRANSACTION} WHERE user_id = ?1 AND status = 'open' \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let latest = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match latest {
            Some(record) => Ok(record),
            None => self.create_open(user_id).await,
        }
    }

    // =========================================================================
    // Status Transitions (conditional updates)
    // =========================================================================

    /// Checks out an open transaction inside the caller's transaction.
    ///
    /// Returns the number of affected rows: zero means the row was not open
    /// (or not owned) at write time - the caller must treat that as a
    /// conflict and roll back.
    pub async fn checkout_in(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        id: i64,
        totals: &TransactionTotals,
        status: TransactionStatus,
    ) -> ApiResult<u64> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                subtotal_cents = ?3,
                discount_cents = ?4,
                adjustment_type = ?5,
                adjustment_percent_bps = ?6,
                adjustment_amount_cents = ?7,
                total_cents = ?8,
                status = ?9,
                updated_at = ?10
            WHERE id = ?1 AND user_id = ?2 AND status = 'open'
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(totals.subtotal.cents())
        .bind(totals.discount.cents())
        .bind(totals.adjustment.map(|a| a.kind))
        .bind(totals.adjustment.map(|a| a.percent.bps()).unwrap_or(0))
        .bind(totals.adjustment_amount.cents())
        .bind(totals.total.cents())
        .bind(status)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Flips a terminal transaction back to open, on the same row, items
    /// untouched. Zero affected rows means it was not terminal (or not
    /// owned).
    pub async fn reopen(&self, user_id: i64, id: i64) -> ApiResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                status = 'open',
                updated_at = ?3
            WHERE id = ?1 AND user_id = ?2 AND status IN ('cash', 'card', 'order')
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes an open transaction. Zero affected rows means it was not open
    /// at write time.
    pub async fn delete_open(&self, user_id: i64, id: i64) -> ApiResult<u64> {
        let result = sqlx::query(
            "DELETE FROM transactions WHERE id = ?1 AND user_id = ?2 AND status = 'open'",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Sets (or clears) the customer of an open transaction.
    pub async fn set_customer(
        &self,
        user_id: i64,
        id: i64,
        customer_id: Option<i64>,
    ) -> ApiResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                customer_id = ?3,
                updated_at = ?4
            WHERE id = ?1 AND user_id = ?2 AND status = 'open'
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(customer_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Sync Writes (inside the per-entry transaction)
    // =========================================================================

    /// Re-reads a source transaction inside the sync transaction, requiring
    /// it to still be open and owned.
    pub async fn find_open_owned_in(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        id: i64,
    ) -> ApiResult<Option<TransactionRecord>> {
        let sql = format!("{SELECT_TRANSACTION} WHERE id = ?1 AND user_id = ?2 AND status = 'open'");
        let record = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(record)
    }

    /// Inserts a fully reconciled transaction and returns its id.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_synced_in(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        client_receipt_id: &str,
        customer_id: Option<i64>,
        totals: &TransactionTotals,
        status: TransactionStatus,
        notes: Option<&str>,
    ) -> ApiResult<(i64, String)> {
        let now = Utc::now();
        let code = generate_transaction_code();

        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                user_id, client_receipt_id, transaction_code, customer_id,
                subtotal_cents, discount_cents, adjustment_type,
                adjustment_percent_bps, adjustment_amount_cents, total_cents,
                status, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            "#,
        )
        .bind(user_id)
        .bind(client_receipt_id)
        .bind(&code)
        .bind(customer_id)
        .bind(totals.subtotal.cents())
        .bind(totals.discount.cents())
        .bind(totals.adjustment.map(|a| a.kind))
        .bind(totals.adjustment.map(|a| a.percent.bps()).unwrap_or(0))
        .bind(totals.adjustment_amount.cents())
        .bind(totals.total.cents())
        .bind(status)
        .bind(notes)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok((result.last_insert_rowid(), code))
    }

    /// Overwrites a source open transaction with the reconciled receipt
    /// (merge-by-source: the offline sale must not duplicate the row it
    /// began life as).
    #[allow(clippy::too_many_arguments)]
    pub async fn overwrite_synced_in(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        id: i64,
        client_receipt_id: &str,
        customer_id: Option<i64>,
        totals: &TransactionTotals,
        status: TransactionStatus,
        notes: Option<&str>,
    ) -> ApiResult<u64> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                client_receipt_id = ?3,
                customer_id = ?4,
                subtotal_cents = ?5,
                discount_cents = ?6,
                adjustment_type = ?7,
                adjustment_percent_bps = ?8,
                adjustment_amount_cents = ?9,
                total_cents = ?10,
                status = ?11,
                notes = ?12,
                updated_at = ?13
            WHERE id = ?1 AND user_id = ?2 AND status = 'open'
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(client_receipt_id)
        .bind(customer_id)
        .bind(totals.subtotal.cents())
        .bind(totals.discount.cents())
        .bind(totals.adjustment.map(|a| a.kind))
        .bind(totals.adjustment.map(|a| a.percent.bps()).unwrap_or(0))
        .bind(totals.adjustment_amount.cents())
        .bind(totals.total.cents())
        .bind(status)
        .bind(notes)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes every item of a transaction (the replace-all half).
    pub async fn delete_items_in(
        tx: &mut Transaction<'static, Sqlite>,
        transaction_id: i64,
    ) -> ApiResult<()> {
        sqlx::query("DELETE FROM transaction_items WHERE transaction_id = ?1")
            .bind(transaction_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Inserts one normalized item.
    pub async fn insert_item_in(
        tx: &mut Transaction<'static, Sqlite>,
        transaction_id: i64,
        item: &NewTransactionItem,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transaction_items (
                transaction_id, product_id, product_name, packages, quantity,
                unit_price_cents, vat_rate_bps, total_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(transaction_id)
        .bind(item.product_id)
        .bind(&item.product_name)
        .bind(item.packages)
        .bind(item.quantity)
        .bind(item.unit_price.cents())
        .bind(item.vat_rate.bps())
        .bind(item.total.cents())
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// Generates a human-readable transaction code: `UC` + yymmdd + 6 digits.
///
/// The serial comes from UUID entropy rather than a daily counter, so codes
/// stay unique-enough without coordination.
fn generate_transaction_code() -> String {
    let serial = (Uuid::new_v4().as_u128() % 1_000_000) as u32;
    format!("UC{}{:06}", Utc::now().format("%y%m%d"), serial)
}

// =============================================================================
// Unit Tests
// =============================================================================
