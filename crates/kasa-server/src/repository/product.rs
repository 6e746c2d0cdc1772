//! # Product Repository
//!
//! Catalog lookups for VAT resolution and ad hoc product promotion.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use kasa_core::money::{Money, Rate};

use crate::error::ApiResult;
use crate::models::ProductRecord;

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Fetches one product owned by the user.
    pub async fn find_owned(&self, user_id: i64, id: i64) -> ApiResult<Option<ProductRecord>> {
        let record = sqlx::query_as::<_, ProductRecord>(
            r#"
            SELECT id, user_id, name, ean, vat_rate_bps, price_cents,
                   is_active, created_at, updated_at
            FROM products
            WHERE id = ?1 AND user_id = ?2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Stored VAT rates for the user's products among `ids`.
    ///
    /// Ids missing from the result either don't exist or belong to another
    /// user - the pricing engine treats such lines as ad hoc.
    pub async fn vat_rates_for(
        &self,
        user_id: i64,
        ids: &[i64],
    ) -> ApiResult<HashMap<i64, Rate>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, vat_rate_bps FROM products WHERE user_id = ? AND id IN ({placeholders})"
        );

        let mut query = sqlx::query_as::<_, (i64, i64)>(&sql).bind(user_id);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(id, bps)| (id, Rate::from_bps(bps)))
            .collect())
    }

    /// Promotes an ad hoc line into the catalog inside the caller's
    /// transaction; returns the new product id.
    ///
    /// Promotions from an authoritative checkout are active immediately; the
    /// background sync path creates them inactive so they wait for review
    /// before showing up in the catalog.
    pub async fn promote_in(
        tx: &mut Transaction<'static, Sqlite>,
        user_id: i64,
        name: &str,
        vat_rate: Rate,
        base_unit_price: Money,
        is_active: bool,
    ) -> ApiResult<i64> {
        let now = Utc::now();

        debug!(user_id, name = %name, is_active, "Promoting ad hoc product");

        let result = sqlx::query(
            r#"
            INSERT INTO products (
                user_id, name, ean, vat_rate_bps, price_cents, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(vat_rate.bps())
        .bind(base_unit_price.cents())
        .bind(is_active)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Seeds a catalog product directly (tests and fixtures).
    pub async fn create(
        &self,
        user_id: i64,
        name: &str,
        vat_rate: Rate,
        price: Money,
    ) -> ApiResult<ProductRecord> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO products (
                user_id, name, ean, vat_rate_bps, price_cents, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, NULL, ?3, ?4, 1, ?5, ?5)
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(vat_rate.bps())
        .bind(price.cents())
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        let record = self
            .find_owned(user_id, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok(record)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
