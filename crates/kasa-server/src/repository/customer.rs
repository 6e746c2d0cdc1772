//! # Customer Repository
//!
//! Owned-customer resolution for sync and receipt-customer assignment,
//! plus creation from registry lookup data.
//!
//! Customer references arriving over the wire are never trusted across
//! tenants: a referenced id only attaches when the customer exists AND
//! belongs to the calling user.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::ApiResult;
use crate::models::CustomerRecord;
use crate::registry::CompanyIdentity;

const SELECT_CUSTOMER: &str = r#"
    SELECT id, user_id, company_name, company_id, vat_id, first_name,
           last_name, email, phone_number, street, city, zip, country_code,
           created_at, updated_at
    FROM customers
"#;

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Returns the id back only when the customer exists and is owned by the
    /// user.
    pub async fn resolve_owned_id(&self, user_id: i64, id: i64) -> ApiResult<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM customers WHERE id = ?1 AND user_id = ?2")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Fetches one customer owned by the user.
    pub async fn get_owned(&self, user_id: i64, id: i64) -> ApiResult<Option<CustomerRecord>> {
        let sql = format!("{SELECT_CUSTOMER} WHERE id = ?1 AND user_id = ?2");
        let record = sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Looks a customer up by the 8-digit company registry id.
    pub async fn find_by_company_id(
        &self,
        user_id: i64,
        company_id: &str,
    ) -> ApiResult<Option<CustomerRecord>> {
        let sql = format!("{SELECT_CUSTOMER} WHERE user_id = ?1 AND company_id = ?2");
        let record = sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(user_id)
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Creates a customer from registry lookup data.
    pub async fn insert_from_identity(
        &self,
        user_id: i64,
        identity: &CompanyIdentity,
    ) -> ApiResult<CustomerRecord> {
        let now = Utc::now();

        debug!(user_id, company_id = %identity.company_id, "Creating customer from registry data");

        let result = sqlx::query(
            r#"
            INSERT INTO customers (
                user_id, company_name, company_id, vat_id, first_name,
                last_name, email, phone_number, street, city, zip,
                country_code, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, NULL, NULL, NULL, NULL, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
        )
        .bind(user_id)
        .bind(&identity.company_name)
        .bind(&identity.company_id)
        .bind(&identity.vat_id)
        .bind(&identity.street)
        .bind(&identity.city)
        .bind(&identity.zip)
        .bind(&identity.country_code)
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

    /// Seeds a bare customer (tests and fixtures).
    pub async fn create_named(&self, user_id: i64, company_name: &str) -> ApiResult<CustomerRecord> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO customers (
                user_id, company_name, company_id, vat_id, first_name,
                last_name, email, phone_number, street, city, zip,
                country_code, created_at, updated_at
            ) VALUES (?1, ?2, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL,
                      NULL, NULL, ?3, ?3)
            "#,
        )
        .bind(user_id)
        .bind(company_name)
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
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn repo() -> CustomerRepository {
        let db = Database::connect_in_memory().await.unwrap();
        CustomerRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn resolution_is_user_scoped() {
        let repo = repo().await;
        let customer = repo.create_named(1, "Acme s.r.o.").await.unwrap();

        assert_eq!(
            repo.resolve_owned_id(1, customer.id).await.unwrap(),
            Some(customer.id)
        );
        // Another tenant's customer never resolves
        assert_eq!(repo.resolve_owned_id(2, customer.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_from_identity_roundtrips() {
        let repo = repo().await;
        let identity = CompanyIdentity {
            company_id: "12345678".into(),
            company_name: "Lesy Praha a.s.".into(),
            vat_id: Some("CZ12345678".into()),
            street: Some("Dlouhá 12".into()),
            city: Some("Praha".into()),
            zip: Some("11000".into()),
            country_code: Some("CZ".into()),
        };

        let customer = repo.insert_from_identity(1, &identity).await.unwrap();
        assert_eq!(customer.company_id.as_deref(), Some("12345678"));
        assert_eq!(customer.display_name(), "Lesy Praha a.s.");

        let found = repo.find_by_company_id(1, "12345678").await.unwrap();
        assert!(found.is_some());
    }
}
