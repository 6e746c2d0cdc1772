//! # Pricing Engine
//!
//! The deterministic monetary computation shared by both sides of the sync
//! boundary.
//!
//! ## Why One Engine?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Pricing Determinism Contract                         │
//! │                                                                         │
//! │  CLIENT (live preview)                SERVER (authoritative)            │
//! │                                                                         │
//! │  cashier edits line                   sync batch arrives                │
//! │       │                                    │                            │
//! │       ▼                                    ▼                            │
//! │  recalculate(lines, adj, vat)        recalculate(lines, adj, vat)       │
//! │       │                                    │                            │
//! │       ▼                                    ▼                            │
//! │  totals shown on screen    ═══ MUST EQUAL ═══  totals persisted         │
//! │                                                                         │
//! │  The server NEVER trusts client-submitted money fields; it recomputes   │
//! │  from packages/quantity/base_unit_price with this same function.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rounding Order (compatibility contract)
//! Unit prices are rounded to cents immediately after the adjustment
//! multiplication, and line totals are products of integers from then on.
//! This step-by-step rounding can differ by a cent from a
//! round-once-at-the-end computation; the step-by-step result is the
//! compatibility contract on both sides of the wire.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::money::{Money, Rate};
use crate::types::{Adjustment, AdjustmentKind};
use crate::DEFAULT_MANUAL_VAT_RATE;

// =============================================================================
// Inputs
// =============================================================================

/// One input line for the pricing engine.
///
/// `product_id` makes the line a catalog line *only if* the id is present in
/// the caller-supplied VAT map (i.e. the product exists and belongs to the
/// caller). Anything else is an ad hoc line subject to catalog promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingLine {
    pub product_id: Option<i64>,
    pub product_name: String,
    pub packages: i64,
    pub quantity: i64,
    pub base_unit_price: Money,
    /// Wire-submitted VAT rate, only honored for ad hoc lines.
    pub explicit_vat_rate: Option<Rate>,
}

// =============================================================================
// Outputs
// =============================================================================

/// A fully priced line: the normalized item shape persisted by both the
/// checkout path and the sync path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLine {
    /// Resolved catalog product; `None` means the caller must promote the
    /// line into the catalog before persisting (promotion is I/O and lives
    /// outside the engine).
    pub product_id: Option<i64>,
    pub product_name: String,
    pub packages: i64,
    pub quantity: i64,
    pub base_unit_price: Money,
    /// Unit price after the receipt-wide adjustment, rounded to cents.
    pub unit_price: Money,
    pub vat_rate: Rate,
    /// `packages × quantity × unit_price`.
    pub total: Money,
}

impl PricedLine {
    /// True when the line needs a catalog product created for it.
    #[inline]
    pub fn needs_promotion(&self) -> bool {
        self.product_id.is_none()
    }
}

/// Aggregate result of pricing a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingOutcome {
    pub lines: Vec<PricedLine>,
    /// Pre-adjustment sum of `packages × quantity × base_unit_price`.
    pub base_subtotal: Money,
    /// Post-adjustment sum of line totals.
    pub subtotal: Money,
    /// `base_subtotal × percent`, or zero without an adjustment.
    pub adjustment_amount: Money,
    /// Legacy field: mirrors `adjustment_amount` for discounts only.
    pub discount: Money,
    /// Equals `subtotal` - the adjustment is already folded into every line.
    pub total: Money,
}

// =============================================================================
// Engine
// =============================================================================

/// Applies the receipt-wide adjustment to a unit price.
///
/// No adjustment, or a non-positive percent, leaves the price untouched.
/// The result is rounded to whole cents immediately (see module docs).
pub fn adjust_unit_price(base: Money, adjustment: Option<&Adjustment>) -> Money {
    let Some(adjustment) = adjustment else {
        return base;
    };

    if adjustment.percent.is_non_positive() {
        return base;
    }

    let factor = match adjustment.kind {
        AdjustmentKind::Discount => Rate::from_bps(10_000 - adjustment.percent.bps()),
        AdjustmentKind::Surcharge => Rate::from_bps(10_000 + adjustment.percent.bps()),
    };

    base.scale_by(factor)
}

/// Resolves the VAT rate for one line.
///
/// Precedence:
/// 1. catalog product's stored rate (the wire-submitted rate is ignored)
/// 2. explicit submitted rate, for ad hoc lines
/// 3. the manual default (21%)
pub fn resolve_vat_rate(
    product_id: Option<i64>,
    catalog_vat_rates: &HashMap<i64, Rate>,
    explicit: Option<Rate>,
) -> Rate {
    if let Some(rate) = product_id.and_then(|id| catalog_vat_rates.get(&id)) {
        return *rate;
    }

    explicit.unwrap_or(DEFAULT_MANUAL_VAT_RATE)
}

/// Prices a receipt: per-line adjusted prices and totals plus aggregates.
///
/// Pure function - `catalog_vat_rates` maps the caller's *owned, existing*
/// catalog products to their stored VAT rates; ids absent from the map are
/// demoted to ad hoc lines.
///
/// ## Example
/// ```rust
/// use std::collections::HashMap;
/// use kasa_core::money::{Money, Rate};
/// use kasa_core::pricing::{recalculate, PricingLine};
/// use kasa_core::types::{Adjustment, AdjustmentKind};
///
/// let lines = vec![PricingLine {
///     product_id: None,
///     product_name: "Crate of apples".into(),
///     packages: 2,
///     quantity: 3,
///     base_unit_price: Money::from_cents(1000),
///     explicit_vat_rate: None,
/// }];
/// let adjustment = Adjustment::new(AdjustmentKind::Discount, Rate::from_bps(1000));
///
/// let outcome = recalculate(&lines, Some(&adjustment), &HashMap::new());
/// assert_eq!(outcome.lines[0].unit_price.cents(), 900);
/// assert_eq!(outcome.total.cents(), 5400);
/// ```
pub fn recalculate(
    lines: &[PricingLine],
    adjustment: Option<&Adjustment>,
    catalog_vat_rates: &HashMap<i64, Rate>,
) -> PricingOutcome {
    let mut priced = Vec::with_capacity(lines.len());
    let mut base_subtotal = Money::zero();
    let mut subtotal = Money::zero();

    for line in lines {
        let unit_price = adjust_unit_price(line.base_unit_price, adjustment);
        let total = unit_price.multiply_counts(line.packages, line.quantity);
        let base_total = line.base_unit_price.multiply_counts(line.packages, line.quantity);

        // A product id that the caller does not actually own resolves to an
        // ad hoc line; the stored rate wins only for known catalog products.
        let is_catalog = line
            .product_id
            .is_some_and(|id| catalog_vat_rates.contains_key(&id));
        let vat_rate = resolve_vat_rate(line.product_id, catalog_vat_rates, line.explicit_vat_rate);

        priced.push(PricedLine {
            product_id: line.product_id.filter(|_| is_catalog),
            product_name: line.product_name.clone(),
            packages: line.packages,
            quantity: line.quantity,
            base_unit_price: line.base_unit_price,
            unit_price,
            vat_rate,
            total,
        });

        base_subtotal += base_total;
        subtotal += total;
    }

    let adjustment_amount = match adjustment {
        Some(adjustment) => base_subtotal.scale_by(adjustment.percent),
        None => Money::zero(),
    };
    let discount = match adjustment {
        Some(adjustment) if adjustment.kind == AdjustmentKind::Discount => adjustment_amount,
        _ => Money::zero(),
    };

    PricingOutcome {
        lines: priced,
        base_subtotal,
        subtotal,
        adjustment_amount,
        discount,
        // The adjustment is folded into each unit price; there is no second
        // subtraction at the aggregate level.
        total: subtotal,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
