//! Database records and response shapes.
//!
//! Records decode straight out of SQLite rows (integer cents / basis
//! points); DTOs convert back to wire major units at the response boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use kasa_core::money::{Money, Rate};
use kasa_core::types::{AdjustmentKind, TransactionStatus};

// =============================================================================
// Records
// =============================================================================

/// One row of `transactions`.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: i64,
    pub client_receipt_id: Option<String>,
    pub transaction_code: String,
    pub customer_id: Option<i64>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub adjustment_type: Option<AdjustmentKind>,
    pub adjustment_percent_bps: i64,
    pub adjustment_amount_cents: i64,
    pub total_cents: i64,
    pub status: TransactionStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of `transaction_items`.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionItemRecord {
    pub id: i64,
    pub transaction_id: i64,
    pub product_id: Option<i64>,
    pub product_name: String,
    pub packages: i64,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub vat_rate_bps: i64,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// One row of `products`.
#[derive(Debug, Clone, FromRow)]
pub struct ProductRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub ean: Option<String>,
    pub vat_rate_bps: i64,
    pub price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRecord {
    #[inline]
    pub fn vat_rate(&self) -> Rate {
        Rate::from_bps(self.vat_rate_bps)
    }
}

/// One row of `customers`.
#[derive(Debug, Clone, FromRow)]
pub struct CustomerRecord {
    pub id: i64,
    pub user_id: i64,
    pub company_name: Option<String>,
    pub company_id: Option<String>,
    pub vat_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub country_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomerRecord {
    /// Personal name when present, company name otherwise.
    pub fn display_name(&self) -> String {
        let full_name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        if full_name.trim().is_empty() {
            self.company_name.clone().unwrap_or_default()
        } else {
            full_name
        }
    }
}

// =============================================================================
// Response DTOs
// =============================================================================

/// A transaction as returned by the receipt lifecycle endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionDto {
    pub id: i64,
    pub transaction_code: String,
    pub client_receipt_id: Option<String>,
    pub customer_id: Option<i64>,
    pub subtotal: f64,
    pub discount: f64,
    pub adjustment_type: Option<String>,
    pub adjustment_percent: f64,
    pub adjustment_amount: f64,
    pub total: f64,
    pub status: TransactionStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<TransactionItemDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionItemDto {
    pub id: i64,
    pub product_id: Option<i64>,
    pub product_name: String,
    pub packages: i64,
    pub quantity: i64,
    pub unit_price: f64,
    pub vat_rate: f64,
    pub total: f64,
}

impl TransactionDto {
    pub fn from_record(record: TransactionRecord, items: Vec<TransactionItemRecord>) -> Self {
        TransactionDto {
            id: record.id,
            transaction_code: record.transaction_code,
            client_receipt_id: record.client_receipt_id,
            customer_id: record.customer_id,
            subtotal: Money::from_cents(record.subtotal_cents).to_major_units(),
            discount: Money::from_cents(record.discount_cents).to_major_units(),
            adjustment_type: record.adjustment_type.map(|k| k.as_str().to_string()),
            adjustment_percent: Rate::from_bps(record.adjustment_percent_bps).to_major_units(),
            adjustment_amount: Money::from_cents(record.adjustment_amount_cents).to_major_units(),
            total: Money::from_cents(record.total_cents).to_major_units(),
            status: record.status,
            notes: record.notes,
            created_at: record.created_at,
            updated_at: record.updated_at,
            items: items.into_iter().map(TransactionItemDto::from_record).collect(),
        }
    }
}

impl TransactionItemDto {
    pub fn from_record(record: TransactionItemRecord) -> Self {
        TransactionItemDto {
            id: record.id,
            product_id: record.product_id,
            product_name: record.product_name,
            packages: record.packages,
            quantity: record.quantity,
            unit_price: Money::from_cents(record.unit_price_cents).to_major_units(),
            vat_rate: Rate::from_bps(record.vat_rate_bps).to_major_units(),
            total: Money::from_cents(record.total_cents).to_major_units(),
        }
    }
}
