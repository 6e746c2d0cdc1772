//! Integration flows over an in-memory store: the reconciliation endpoint's
//! guarantees (idempotency, partial-batch isolation, authoritative pricing,
//! merge-by-source) and the receipt lifecycle invariants.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use kasa_core::money::{Money, Rate};
use kasa_core::protocol::{SyncBatchRequest, SyncResultStatus};
use kasa_core::types::TransactionStatus;
use kasa_server::auth::AuthUser;
use kasa_server::db::Database;
use kasa_server::registry::{CompanyIdentity, CompanyRegistry, LookupError};
use kasa_server::services::receipts::{self, AssignCustomerRequest, CheckoutRequest};
use kasa_server::services::sync;
use kasa_server::{router, AppState};

const USER: AuthUser = AuthUser(1);
const OTHER_USER: AuthUser = AuthUser(2);

// =============================================================================
// Fixtures
// =============================================================================

/// Registry fake: knows exactly one company, everything else is not found.
struct StaticRegistry;

impl CompanyRegistry for StaticRegistry {
    fn lookup<'a>(
        &'a self,
        company_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CompanyIdentity, LookupError>> + Send + 'a>> {
        Box::pin(async move {
            if company_id == "12345678" {
                Ok(CompanyIdentity {
                    company_id: company_id.to_string(),
                    company_name: "Lesy Praha a.s.".into(),
                    vat_id: Some("CZ12345678".into()),
                    street: Some("Dlouhá 12".into()),
                    city: Some("Praha".into()),
                    zip: Some("11000".into()),
                    country_code: Some("CZ".into()),
                })
            } else {
                Err(LookupError::NotFound)
            }
        })
    }
}

async fn test_state() -> AppState {
    let db = Database::connect_in_memory().await.unwrap();
    AppState::new(&db, Arc::new(StaticRegistry))
}

fn item(product_id: Option<i64>, name: &str, packages: i64, quantity: i64, price: f64) -> Value {
    json!({
        "product_id": product_id,
        "product_name": name,
        "packages": packages,
        "quantity": quantity,
        "base_unit_price": price,
        "unit_price": price,
        "vat_rate": null,
        "total": null
    })
}

fn receipt(client_receipt_id: &str, items: Vec<Value>) -> Value {
    json!({
        "client_receipt_id": client_receipt_id,
        "client_created_at": null,
        "checkout_method": "cash",
        "source_transaction_id": null,
        "adjustment_type": null,
        "adjustment_percent": 0,
        "customer_ref": null,
        "notes": null,
        "items": items
    })
}

async fn run_batch(state: &AppState, user: AuthUser, receipts: Vec<Value>) -> Vec<Value> {
    let response =
        sync::process_batch(state, user.id(), SyncBatchRequest { receipts }).await;
    serde_json::to_value(&response).unwrap()["results"]
        .as_array()
        .cloned()
        .unwrap()
}

// =============================================================================
// Sync Endpoint Properties
// =============================================================================

#[tokio::test]
async fn sync_creates_transaction_and_items() {
    let state = test_state().await;

    let results = run_batch(
        &state,
        USER,
        vec![receipt("temp:1234", vec![item(None, "Manual item", 1, 1, 50.0)])],
    )
    .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["status"], "synced");
    assert_eq!(results[0]["client_receipt_id"], "temp:1234");
    let transaction_id = results[0]["transaction_id"].as_i64().unwrap();

    let record = state
        .transactions()
        .get_owned(USER.id(), transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TransactionStatus::Cash);
    assert_eq!(record.total_cents, 5000);
    assert_eq!(record.client_receipt_id.as_deref(), Some("temp:1234"));
    assert!(record.transaction_code.starts_with("UC"));

    let items = state.transactions().items(transaction_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].unit_price_cents, 5000);
    // Ad hoc line was promoted into the catalog
    let product_id = items[0].product_id.unwrap();
    let product = state
        .products()
        .find_owned(USER.id(), product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.name, "Manual item");
    // Background-sync promotion waits for review
    assert!(!product.is_active);
    // Default manual VAT applied
    assert_eq!(product.vat_rate_bps, 2100);
}

#[tokio::test]
async fn sync_is_idempotent_for_same_client_receipt_id() {
    let state = test_state().await;
    let payload = receipt("temp:dup", vec![item(None, "Manual item", 1, 1, 10.0)]);

    let first = run_batch(&state, USER, vec![payload.clone()]).await;
    let second = run_batch(&state, USER, vec![payload]).await;

    assert_eq!(first[0]["status"], "synced");
    assert_eq!(second[0]["status"], "synced");
    assert_eq!(first[0]["transaction_id"], second[0]["transaction_id"]);
    assert_eq!(first[0]["transaction_code"], second[0]["transaction_code"]);

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(state.pool())
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}

#[tokio::test]
async fn malformed_entry_rejects_without_failing_batch() {
    let state = test_state().await;

    let results = run_batch(
        &state,
        USER,
        vec![
            receipt("temp:invalid-1", vec![]), // no items
            receipt("temp:valid-1", vec![item(None, "Espresso", 1, 2, 12.0)]),
        ],
    )
    .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["client_receipt_id"], "temp:invalid-1");
    assert_eq!(results[0]["status"], "rejected");
    assert_eq!(results[0]["error_code"], "validation_failed");
    assert_eq!(results[1]["client_receipt_id"], "temp:valid-1");
    assert_eq!(results[1]["status"], "synced");

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(state.pool())
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}

#[tokio::test]
async fn garbage_entry_gets_an_indexed_id() {
    let state = test_state().await;

    let results = run_batch(
        &state,
        USER,
        vec![json!({ "client_receipt_id": 42, "items": "nope" })],
    )
    .await;

    assert_eq!(results[0]["status"], "rejected");
    assert_eq!(results[0]["client_receipt_id"], "invalid:0");
}

#[tokio::test]
async fn server_recomputes_advisory_money_fields() {
    let state = test_state().await;

    // The wire claims absurd unit prices and totals; 10% discount on 10.00
    // must still come out as 9.00/54.00.
    let payload = json!({
        "client_receipt_id": "temp:advisory",
        "checkout_method": "card",
        "adjustment_type": "discount",
        "adjustment_percent": 10,
        "subtotal": 1.0,
        "total": 99999.0,
        "items": [{
            "product_id": null,
            "product_name": "Crate of apples",
            "packages": 2,
            "quantity": 3,
            "base_unit_price": 10.0,
            "unit_price": 123.0,
            "vat_rate": null,
            "total": 456.0
        }]
    });

    let results = run_batch(&state, USER, vec![payload]).await;
    let transaction_id = results[0]["transaction_id"].as_i64().unwrap();

    let record = state
        .transactions()
        .get_owned(USER.id(), transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.subtotal_cents, 5400);
    assert_eq!(record.total_cents, 5400);
    assert_eq!(record.discount_cents, 600);
    assert_eq!(record.adjustment_amount_cents, 600);
    assert_eq!(record.status, TransactionStatus::Card);

    let items = state.transactions().items(transaction_id).await.unwrap();
    assert_eq!(items[0].unit_price_cents, 900);
    assert_eq!(items[0].total_cents, 5400);
}

#[tokio::test]
async fn vat_precedence_catalog_beats_wire() {
    let state = test_state().await;
    let product = state
        .products()
        .create(USER.id(), "Beer", Rate::from_bps(2100), Money::from_cents(4500))
        .await
        .unwrap();

    let payload = json!({
        "client_receipt_id": "temp:vat",
        "checkout_method": "cash",
        "items": [
            // Catalog line lying about its VAT rate
            { "product_id": product.id, "product_name": "Beer", "packages": 1,
              "quantity": 1, "base_unit_price": 45.0, "unit_price": 45.0,
              "vat_rate": 0, "total": 45.0 },
            // Ad hoc line with an explicit rate
            { "product_id": null, "product_name": "Cork fee", "packages": 1,
              "quantity": 1, "base_unit_price": 2.0, "unit_price": 2.0,
              "vat_rate": 15, "total": 2.0 },
            // Ad hoc line with no rate at all
            { "product_id": null, "product_name": "Deposit", "packages": 1,
              "quantity": 1, "base_unit_price": 1.0, "unit_price": 1.0,
              "vat_rate": null, "total": 1.0 }
        ]
    });

    let results = run_batch(&state, USER, vec![payload]).await;
    let transaction_id = results[0]["transaction_id"].as_i64().unwrap();

    let items = state.transactions().items(transaction_id).await.unwrap();
    assert_eq!(items[0].vat_rate_bps, 2100); // catalog wins over wire 0
    assert_eq!(items[0].product_id, Some(product.id));
    assert_eq!(items[1].vat_rate_bps, 1500); // explicit ad hoc rate
    assert_eq!(items[2].vat_rate_bps, 2100); // manual default
}

#[tokio::test]
async fn merge_by_source_overwrites_open_transaction() {
    let state = test_state().await;
    let source = state.transactions().create_open(USER.id()).await.unwrap();

    let payload = json!({
        "client_receipt_id": "temp:merge",
        "checkout_method": "order",
        "source_transaction_id": source.id,
        "items": [item(None, "Firewood", 1, 2, 30.0)]
    });

    let results = run_batch(&state, USER, vec![payload]).await;
    assert_eq!(results[0]["status"], "synced");
    // Same row, not a duplicate
    assert_eq!(results[0]["transaction_id"].as_i64().unwrap(), source.id);
    assert_eq!(
        results[0]["transaction_code"].as_str().unwrap(),
        source.transaction_code
    );

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(state.pool())
        .await
        .unwrap();
    assert_eq!(count.0, 1);

    let record = state
        .transactions()
        .get_owned(USER.id(), source.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TransactionStatus::Order);
    assert_eq!(record.total_cents, 6000);
    assert_eq!(record.client_receipt_id.as_deref(), Some("temp:merge"));
}

#[tokio::test]
async fn merge_skipped_when_source_not_open() {
    let state = test_state().await;
    let source = state.transactions().create_open(USER.id()).await.unwrap();

    // Check the source out first so it is terminal
    receipts::checkout(
        &state,
        USER,
        source.id,
        CheckoutRequest {
            checkout_method: "cash".into(),
            adjustment_type: None,
            adjustment_percent: 0.0,
            subtotal: None,
            total: None,
            items: vec![serde_json::from_value(item(None, "Pretzel", 1, 1, 3.0)).unwrap()],
        },
    )
    .await
    .unwrap();

    let payload = json!({
        "client_receipt_id": "temp:merge-closed",
        "checkout_method": "cash",
        "source_transaction_id": source.id,
        "items": [item(None, "Firewood", 1, 1, 30.0)]
    });
    let results = run_batch(&state, USER, vec![payload]).await;

    // A new transaction was inserted instead of touching the closed one
    let new_id = results[0]["transaction_id"].as_i64().unwrap();
    assert_ne!(new_id, source.id);

    let untouched = state
        .transactions()
        .get_owned(USER.id(), source.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, TransactionStatus::Cash);
    assert_eq!(untouched.total_cents, 300);
}

#[tokio::test]
async fn foreign_customer_not_linked_but_noted() {
    let state = test_state().await;
    // The customer belongs to someone else
    let foreign = state
        .customers()
        .create_named(OTHER_USER.id(), "Jane Offline s.r.o.")
        .await
        .unwrap();

    let payload = json!({
        "client_receipt_id": "temp:customer",
        "checkout_method": "cash",
        "customer_ref": { "id": foreign.id, "name": "Jane Offline" },
        "items": [item(None, "Espresso", 1, 1, 9.0)]
    });

    let results = run_batch(&state, USER, vec![payload]).await;
    let transaction_id = results[0]["transaction_id"].as_i64().unwrap();

    let record = state
        .transactions()
        .get_owned(USER.id(), transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.customer_id, None);
    assert_eq!(record.notes.as_deref(), Some("Offline customer: Jane Offline"));
}

#[tokio::test]
async fn owned_customer_links_without_note() {
    let state = test_state().await;
    let mine = state
        .customers()
        .create_named(USER.id(), "Acme s.r.o.")
        .await
        .unwrap();

    let payload = json!({
        "client_receipt_id": "temp:owned-customer",
        "checkout_method": "cash",
        "customer_ref": { "id": mine.id, "name": "Acme s.r.o." },
        "items": [item(None, "Espresso", 1, 1, 9.0)]
    });

    let results = run_batch(&state, USER, vec![payload]).await;
    let transaction_id = results[0]["transaction_id"].as_i64().unwrap();

    let record = state
        .transactions()
        .get_owned(USER.id(), transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.customer_id, Some(mine.id));
    assert_eq!(record.notes, None);
}

// =============================================================================
// Receipt Lifecycle Properties
// =============================================================================

#[tokio::test]
async fn deleting_only_open_receipt_creates_exactly_one_replacement() {
    let state = test_state().await;
    let only = state.transactions().create_open(USER.id()).await.unwrap();

    let response = receipts::delete_receipt(&state, USER, only.id).await.unwrap();

    assert_eq!(response.open_transactions.len(), 1);
    assert_ne!(response.open_transactions[0].id, only.id);
    assert_eq!(response.active_transaction_id, response.open_transactions[0].id);
}

#[tokio::test]
async fn deleting_one_of_several_creates_none() {
    let state = test_state().await;
    let first = state.transactions().create_open(USER.id()).await.unwrap();
    let second = state.transactions().create_open(USER.id()).await.unwrap();

    let response = receipts::delete_receipt(&state, USER, first.id).await.unwrap();

    assert_eq!(response.open_transactions.len(), 1);
    assert_eq!(response.open_transactions[0].id, second.id);
}

#[tokio::test]
async fn checkout_rejects_non_open_receipt() {
    let state = test_state().await;
    let open = state.transactions().create_open(USER.id()).await.unwrap();

    let request = || CheckoutRequest {
        checkout_method: "cash".into(),
        adjustment_type: None,
        adjustment_percent: 0.0,
        subtotal: None,
        total: None,
        items: vec![serde_json::from_value(item(None, "Pretzel", 1, 1, 3.0)).unwrap()],
    };

    receipts::checkout(&state, USER, open.id, request()).await.unwrap();
    // Second checkout hits a terminal row
    let err = receipts::checkout(&state, USER, open.id, request()).await.unwrap_err();
    assert!(err.to_string().contains("Only open receipts"));
}

#[tokio::test]
async fn checkout_replaces_items_and_restores_open_invariant() {
    let state = test_state().await;
    let open = state.transactions().create_open(USER.id()).await.unwrap();

    let response = receipts::checkout(
        &state,
        USER,
        open.id,
        CheckoutRequest {
            checkout_method: "card".into(),
            adjustment_type: Some("surcharge".into()),
            adjustment_percent: 10.0,
            subtotal: None,
            total: None,
            items: vec![serde_json::from_value(item(None, "Pretzel", 1, 2, 3.0)).unwrap()],
        },
    )
    .await
    .unwrap();

    // 3.00 × 1.1 = 3.30 per unit, × 2 = 6.60
    assert_eq!(response.transaction.total, 6.6);
    assert_eq!(response.transaction.items.len(), 1);
    assert_eq!(response.transaction.items[0].unit_price, 3.3);
    // Surcharge keeps the legacy discount at zero
    assert_eq!(response.transaction.discount, 0.0);
    // Checkout promotions are active immediately
    let product_id = response.transaction.items[0].product_id.unwrap();
    let product = state
        .products()
        .find_owned(USER.id(), product_id)
        .await
        .unwrap()
        .unwrap();
    assert!(product.is_active);

    // The invariant re-established a fresh open receipt
    assert_eq!(response.open_transactions.len(), 1);
    assert_ne!(response.active_transaction_id, open.id);
}

#[tokio::test]
async fn checkout_rejects_unknown_product_reference() {
    let state = test_state().await;
    let open = state.transactions().create_open(USER.id()).await.unwrap();

    let err = receipts::checkout(
        &state,
        USER,
        open.id,
        CheckoutRequest {
            checkout_method: "cash".into(),
            adjustment_type: None,
            adjustment_percent: 0.0,
            subtotal: None,
            total: None,
            items: vec![serde_json::from_value(item(Some(999), "Ghost", 1, 1, 3.0)).unwrap()],
        },
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("items.product_id"));
    // Nothing was written
    let record = state
        .transactions()
        .get_owned(USER.id(), open.id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.status.is_open());
    assert!(state.transactions().items(open.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reopen_flips_same_row_and_keeps_items() {
    let state = test_state().await;
    let open = state.transactions().create_open(USER.id()).await.unwrap();

    receipts::checkout(
        &state,
        USER,
        open.id,
        CheckoutRequest {
            checkout_method: "cash".into(),
            adjustment_type: None,
            adjustment_percent: 0.0,
            subtotal: None,
            total: None,
            items: vec![serde_json::from_value(item(None, "Pretzel", 1, 2, 3.0)).unwrap()],
        },
    )
    .await
    .unwrap();

    let before: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(state.pool())
        .await
        .unwrap();

    let response = receipts::reopen_receipt(&state, USER, open.id).await.unwrap();
    assert_eq!(response.transaction.id, open.id);
    assert_eq!(response.transaction.status, TransactionStatus::Open);
    assert_eq!(response.transaction.items.len(), 1);

    let after: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(state.pool())
        .await
        .unwrap();
    // No new row appeared
    assert_eq!(before.0, after.0);

    // Reopening an open receipt is a no-op success
    let again = receipts::reopen_receipt(&state, USER, open.id).await.unwrap();
    assert_eq!(again.transaction.status, TransactionStatus::Open);
}

#[tokio::test]
async fn assign_customer_via_registry_lookup() {
    let state = test_state().await;
    let open = state.transactions().create_open(USER.id()).await.unwrap();

    let response = receipts::assign_customer(
        &state,
        USER,
        open.id,
        AssignCustomerRequest {
            clear_customer: false,
            customer_id: None,
            company_id: Some("123 456 78".into()),
        },
    )
    .await
    .unwrap();

    let customer_id = response.transaction.customer_id.unwrap();
    let customer = state
        .customers()
        .get_owned(USER.id(), customer_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(customer.company_id.as_deref(), Some("12345678"));
    assert_eq!(customer.display_name(), "Lesy Praha a.s.");

    // Clearing detaches without deleting the customer
    let cleared = receipts::assign_customer(
        &state,
        USER,
        open.id,
        AssignCustomerRequest {
            clear_customer: true,
            customer_id: None,
            company_id: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(cleared.transaction.customer_id, None);
}

#[tokio::test]
async fn assign_customer_unknown_company_is_not_found() {
    let state = test_state().await;
    let open = state.transactions().create_open(USER.id()).await.unwrap();

    let err = receipts::assign_customer(
        &state,
        USER,
        open.id,
        AssignCustomerRequest {
            clear_customer: false,
            customer_id: None,
            company_id: Some("99999999".into()),
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

// =============================================================================
// Router-Level Checks
// =============================================================================

#[tokio::test]
async fn sync_over_http_roundtrips() {
    let state = test_state().await;
    let app = router(state);

    let body = json!({
        "receipts": [receipt("temp:http", vec![item(None, "Espresso", 1, 1, 9.0)])]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/offline-receipts/sync")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-user-id", "1")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["results"][0]["status"], "synced");
    assert_eq!(
        parsed["results"][0]["status"],
        serde_json::to_value(SyncResultStatus::Synced).unwrap()
    );
}

#[tokio::test]
async fn missing_user_header_is_unauthorized() {
    let state = test_state().await;
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/offline-receipts/sync")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "receipts": [] }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn conflict_surfaces_as_422_over_http() {
    let state = test_state().await;
    let open = state.transactions().create_open(1).await.unwrap();
    let app = router(state);

    // Delete it once via HTTP...
    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/receipts/{}", open.id))
                .header("x-user-id", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // ...then the second delete finds nothing open under that id
    let second = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/receipts/{}", open.id))
                .header("x-user-id", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}
