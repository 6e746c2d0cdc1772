//! # Money Module
//!
//! Monetary values and percentage rates for the pricing engine.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    All arithmetic happens on i64 cents; the only floats in the system   │
//! │    live at the wire boundary (JSON numbers like 10.99), converted       │
//! │    through `from_major_units` / `to_major_units`.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rounding Contract
//!
//! Monetary values round to 2 decimal places immediately after every
//! multiplication, not once at the end of the computation. In cents that is
//! `Money::scale_by`: `(cents × bps ± 5000) / 10000`, half away from zero.
//! The two-step and single-step results can differ by a cent; the step-by-step
//! variant is the contract (see the pricing tests that pin it).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

// =============================================================================
// Money
// =============================================================================

/// A monetary value in cents (smallest currency unit).
///
/// ## Design Decisions
/// - **i64 (signed)**: refunds and corrections need negative values even
///   though receipt lines themselves are non-negative
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **Serde as plain integer**: local receipts persist cents verbatim
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Converts a wire/display amount (e.g. `10.99`) to cents.
    ///
    /// This is the ONLY place floats enter the money system: JSON payloads
    /// carry major units, rounded to 2 decimal places on ingestion,
    /// half away from zero.
    ///
    /// ## Example
    /// ```rust
    /// use kasa_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_units(10.99).cents(), 1099);
    /// assert_eq!(Money::from_major_units(0.1).cents(), 10);
    /// ```
    #[inline]
    pub fn from_major_units(amount: f64) -> Self {
        Money((amount * 100.0).round() as i64)
    }

    /// Converts cents back to a wire/display amount.
    #[inline]
    pub fn to_major_units(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Multiplies by a rate and rounds to whole cents immediately.
    ///
    /// This is the "round after every multiplication" step of the pricing
    /// contract. Uses i128 internally so large receipts cannot overflow.
    ///
    /// ## Example
    /// ```rust
    /// use kasa_core::money::{Money, Rate};
    ///
    /// // 33.33 × 0.67 = 22.3311 → 22.33
    /// let base = Money::from_cents(3333);
    /// let factor = Rate::from_bps(6700);
    /// assert_eq!(base.scale_by(factor).cents(), 2233);
    /// ```
    pub fn scale_by(&self, rate: Rate) -> Money {
        let product = self.0 as i128 * rate.bps() as i128;
        let rounded = if product >= 0 {
            (product + 5_000) / 10_000
        } else {
            (product - 5_000) / 10_000
        };
        Money(rounded as i64)
    }

    /// Multiplies by package and quantity counts.
    ///
    /// Exact in cents, so no rounding step is needed here: the per-line
    /// rounding already happened when the unit price was adjusted.
    #[inline]
    pub const fn multiply_counts(&self, packages: i64, quantity: i64) -> Self {
        Money(self.0 * packages * quantity)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Rate
// =============================================================================

/// A percentage rate in basis points.
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000. An adjustment of `33.33%` is 3333 bps and
/// a VAT rate of `21%` is 2100 bps - two decimal places of percent precision
/// without any floats, which is exactly what the wire format carries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Rate(i64);

impl Rate {
    /// Creates a rate from basis points.
    #[inline]
    pub const fn from_bps(bps: i64) -> Self {
        Rate(bps)
    }

    /// Converts a wire percentage (e.g. `33.33`) to basis points, rounding to
    /// 2 decimal places of percent on ingestion.
    #[inline]
    pub fn from_major_units(percent: f64) -> Self {
        Rate((percent * 100.0).round() as i64)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> i64 {
        self.0
    }

    /// Returns the rate as a wire percentage.
    #[inline]
    pub fn to_major_units(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Rate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// True for rates at or below zero - adjustments with such a percent are
    /// ignored by the pricing engine.
    #[inline]
    pub const fn is_non_positive(&self) -> bool {
        self.0 <= 0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, (self.0 % 100).abs())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
