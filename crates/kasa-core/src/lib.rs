//! # kasa-core: Pure Business Logic for Kasa POS
//!
//! This crate is the **heart** of the system: everything both sides of the
//! sync boundary must agree on, as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kasa POS Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────┐        ┌──────────────────────────────┐    │
//! │  │      kasa-client        │        │         kasa-server          │    │
//! │  │  local receipt store    │  HTTP  │  sync endpoint (axum)        │    │
//! │  │  background sync engine │ ─────► │  canonical transaction store │    │
//! │  └────────────┬────────────┘        └──────────────┬───────────────┘    │
//! │               │                                    │                    │
//! │               └──────────────┬─────────────────────┘                    │
//! │                              ▼                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                ★ kasa-core (THIS CRATE) ★                       │    │
//! │  │                                                                 │    │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐  │    │
//! │  │   │  money   │ │ pricing  │ │  types   │ │ protocol         │  │    │
//! │  │   │  Money   │ │recalculate│ │ Receipt  │ │ SyncBatchRequest │  │    │
//! │  │   │  Rate    │ │ VAT rules│ │ statuses │ │ ReceiptResult    │  │    │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────────────┘  │    │
//! │  │                                                                 │    │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Integer-cent money and basis-point rates (no floating point
//!   outside the wire boundary)
//! - [`pricing`] - The shared pricing engine: adjustments, VAT resolution,
//!   step-by-step rounding
//! - [`types`] - Domain types (receipts, queue entries, status machines)
//! - [`protocol`] - The sync batch wire format
//! - [`validation`] - Payload shape validation / normalization
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Determinism**: the same lines and adjustment always price to the same
//!    cents, on either side of the wire
//! 2. **No I/O**: database, network and file access are FORBIDDEN here
//! 3. **Integer Money**: all monetary values are cents (i64); floats exist
//!    only at the JSON boundary
//! 4. **Explicit Errors**: typed errors, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod pricing;
pub mod protocol;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Money, Rate};
pub use pricing::{recalculate, PricedLine, PricingLine, PricingOutcome};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// VAT rate applied to ad hoc lines that carry no explicit rate: 21%.
///
/// Catalog lines always use the product's stored rate instead; this default
/// only exists for manually keyed-in items.
pub const DEFAULT_MANUAL_VAT_RATE: Rate = Rate::from_bps(2100);

/// Maximum length of a client receipt id (the idempotency key).
pub const MAX_CLIENT_RECEIPT_ID_LEN: usize = 100;

/// Maximum length of a product name on a receipt line.
pub const MAX_PRODUCT_NAME_LEN: usize = 255;

/// Maximum length of receipt notes.
pub const MAX_NOTES_LEN: usize = 2000;
