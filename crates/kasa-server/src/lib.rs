//! # kasa-server: Sync Endpoint + Canonical Transaction Store
//!
//! The authoritative half of Kasa POS: accepts batches of offline receipts,
//! reconciles each one exactly-once against the canonical transaction store,
//! and serves the receipt lifecycle (checkout/delete/reopen/customer).
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  axum router (routes.rs)                                                │
//! │       │  AuthUser extractor - user id injected by the fronting          │
//! │       │  session layer; everything below is user-scoped                 │
//! │       ▼                                                                 │
//! │  services/ (sync.rs, receipts.rs)                                       │
//! │       │  pricing via kasa-core::recalculate - client money fields       │
//! │       │  are advisory, totals are always recomputed here                │
//! │       ▼                                                                 │
//! │  repository/ (transaction, product, customer)                           │
//! │       │  conditional updates + rows_affected checks on every status     │
//! │       │  transition; per-entry writes in one SQL transaction            │
//! │       ▼                                                                 │
//! │  SQLite (WAL, embedded migrations)                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod registry;
pub mod repository;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use sqlx::SqlitePool;

use crate::db::Database;
use crate::registry::CompanyRegistry;
use crate::repository::{CustomerRepository, ProductRepository, TransactionRepository};

// =============================================================================
// App State
// =============================================================================

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    registry: Arc<dyn CompanyRegistry>,
}

impl AppState {
    pub fn new(db: &Database, registry: Arc<dyn CompanyRegistry>) -> Self {
        AppState {
            pool: db.pool().clone(),
            registry,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn registry(&self) -> &dyn CompanyRegistry {
        self.registry.as_ref()
    }

    pub fn transactions(&self) -> TransactionRepository {
        TransactionRepository::new(self.pool.clone())
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository::new(self.pool.clone())
    }
}

// =============================================================================
// Router
// =============================================================================

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/offline-receipts/sync", post(routes::sync_receipts))
        .route("/api/receipts", post(routes::create_receipt))
        .route("/api/receipts/open", get(routes::open_receipts))
        .route("/api/receipts/{id}/checkout", patch(routes::checkout_receipt))
        .route("/api/receipts/{id}/reopen", post(routes::reopen_receipt))
        .route("/api/receipts/{id}/customer", patch(routes::assign_customer))
        .route("/api/receipts/{id}", delete(routes::delete_receipt))
        .route("/api/registry/company", get(routes::company_lookup))
        .with_state(state)
}
