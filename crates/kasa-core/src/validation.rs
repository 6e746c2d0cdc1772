//! # Payload Validation
//!
//! Shape validation for sync receipt payloads, shared by the server endpoint
//! and usable client-side before enqueueing.
//!
//! ## Parse, Don't Validate
//! Validation here does double duty: it checks ranges AND converts the
//! loosely-typed wire payload ([`ReceiptPayload`]) into a fully typed
//! [`NormalizedReceipt`] whose fields the rest of the system can trust.
//! Wire strings become enums, wire floats become [`Money`]/[`Rate`].
//!
//! Ranges mirror the authoritative endpoint rules: ids ≤ 100 chars, names
//! ≤ 255, notes ≤ 2000, packages/quantity ≥ 1, prices ≥ 0, percent in
//! [0, 100], at least one item.

use crate::error::{ValidationError, ValidationResult};
use crate::money::{Money, Rate};
use crate::pricing::PricingLine;
use crate::protocol::{ItemPayload, ReceiptPayload};
use crate::types::{Adjustment, AdjustmentKind, CheckoutMethod, CustomerRef};
use crate::{MAX_CLIENT_RECEIPT_ID_LEN, MAX_NOTES_LEN, MAX_PRODUCT_NAME_LEN};

// =============================================================================
// Normalized Receipt
// =============================================================================

/// A receipt payload that passed validation, with every field typed.
#[derive(Debug, Clone)]
pub struct NormalizedReceipt {
    pub client_receipt_id: String,
    pub checkout_method: CheckoutMethod,
    pub source_transaction_id: Option<i64>,
    pub adjustment: Option<Adjustment>,
    pub customer_ref: Option<CustomerRef>,
    pub notes: Option<String>,
    pub lines: Vec<PricingLine>,
}

// =============================================================================
// Validators
// =============================================================================

/// Validates one receipt payload and converts it to typed form.
///
/// ## Errors
/// The FIRST violation found is returned - one message per rejected receipt
/// is enough for the cashier-facing retry UI.
pub fn validate_receipt_payload(payload: &ReceiptPayload) -> ValidationResult<NormalizedReceipt> {
    let client_receipt_id = payload.client_receipt_id.trim();
    if client_receipt_id.is_empty() {
        return Err(ValidationError::Required {
            field: "client_receipt_id".into(),
        });
    }
    if client_receipt_id.len() > MAX_CLIENT_RECEIPT_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "client_receipt_id".into(),
            max: MAX_CLIENT_RECEIPT_ID_LEN,
        });
    }

    let checkout_method =
        CheckoutMethod::parse(&payload.checkout_method).ok_or(ValidationError::NotAllowed {
            field: "checkout_method".into(),
            allowed: "cash, card, order".into(),
        })?;

    if let Some(source_id) = payload.source_transaction_id {
        if source_id < 1 {
            return Err(ValidationError::MustBePositive {
                field: "source_transaction_id".into(),
            });
        }
    }

    let adjustment = validate_adjustment(
        payload.adjustment_type.as_deref(),
        payload.adjustment_percent,
    )?;

    if let Some(notes) = &payload.notes {
        if notes.len() > MAX_NOTES_LEN {
            return Err(ValidationError::TooLong {
                field: "notes".into(),
                max: MAX_NOTES_LEN,
            });
        }
    }

    let lines = validate_items(&payload.items)?;

    let customer_ref = payload.customer_ref.as_ref().map(|r| CustomerRef {
        id: r.id.filter(|id| *id > 0),
        name: r.name.as_ref().map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
    });

    Ok(NormalizedReceipt {
        client_receipt_id: client_receipt_id.to_string(),
        checkout_method,
        source_transaction_id: payload.source_transaction_id,
        adjustment,
        customer_ref,
        notes: payload
            .notes
            .as_ref()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        lines,
    })
}

/// Validates the adjustment fields.
///
/// An adjustment exists only when a type is given; the percent is rounded to
/// 2 decimal places of percent on ingestion, like every other wire number.
pub fn validate_adjustment(
    adjustment_type: Option<&str>,
    percent: f64,
) -> ValidationResult<Option<Adjustment>> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(ValidationError::OutOfRange {
            field: "adjustment_percent".into(),
            min: 0,
            max: 100,
        });
    }

    let Some(kind) = adjustment_type else {
        return Ok(None);
    };

    let kind = AdjustmentKind::parse(kind).ok_or(ValidationError::NotAllowed {
        field: "adjustment_type".into(),
        allowed: "discount, surcharge".into(),
    })?;

    Ok(Some(Adjustment::new(kind, Rate::from_major_units(percent))))
}

/// Validates an item list (at least one entry) into pricing lines.
///
/// Used standalone by the server's checkout endpoint, whose body carries the
/// same item shape without the receipt envelope.
pub fn validate_items(items: &[ItemPayload]) -> ValidationResult<Vec<PricingLine>> {
    if items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".into(),
        });
    }

    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        lines.push(validate_item(item)?);
    }
    Ok(lines)
}

fn validate_item(item: &ItemPayload) -> ValidationResult<PricingLine> {
    let name = item.product_name.trim();
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "items.product_name".into(),
        });
    }
    if name.len() > MAX_PRODUCT_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "items.product_name".into(),
            max: MAX_PRODUCT_NAME_LEN,
        });
    }

    if item.packages < 1 {
        return Err(ValidationError::MustBePositive {
            field: "items.packages".into(),
        });
    }
    if item.quantity < 1 {
        return Err(ValidationError::MustBePositive {
            field: "items.quantity".into(),
        });
    }

    if item.base_unit_price < 0.0 {
        return Err(ValidationError::MustBeNonNegative {
            field: "items.base_unit_price".into(),
        });
    }
    if item.unit_price < 0.0 {
        return Err(ValidationError::MustBeNonNegative {
            field: "items.unit_price".into(),
        });
    }
    if let Some(vat) = item.vat_rate {
        if vat < 0.0 {
            return Err(ValidationError::MustBeNonNegative {
                field: "items.vat_rate".into(),
            });
        }
    }

    if let Some(id) = item.product_id {
        if id < 1 {
            return Err(ValidationError::MustBePositive {
                field: "items.product_id".into(),
            });
        }
    }

    Ok(PricingLine {
        product_id: item.product_id,
        product_name: name.to_string(),
        packages: item.packages,
        quantity: item.quantity,
        base_unit_price: Money::from_major_units(item.base_unit_price),
        explicit_vat_rate: item.vat_rate.map(Rate::from_major_units),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
