//! # Money Module
//!
//! Provides the `Money` type for monetary values and `Rate` for percentages.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In JavaScript/floating point:                                          │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  A "Montado" cup of R$10,00 split over 3 flavors:                      │
//! │    R$10,00 / 3 = R$3,33 (×3 = R$9,99)  → Lost R$0,01!                  │
//! │                                                                         │
//! │  OUR SOLUTION: Integer centavos                                         │
//! │    1000 / 3 = 333 (×3 = 999)                                           │
//! │    We KNOW we lost 1 centavo, and the order total is the sum of lines  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use sorveteria_core::money::Money;
//!
//! let price = Money::from_cents(1099); // R$10.99
//! let doubled = price * 2;             // R$21.98
//! let total = price + Money::from_cents(500);
//! assert_eq!(total.cents(), 1599);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in centavos.
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative values for reversals and adjustments
/// - **Single field tuple struct**: Zero-cost abstraction over i64
///
/// ## Where Money is Used
/// ```text
/// Product.sale_price ──► OrderItem.unit_price ──► OrderItem.subtotal
///                                                        │
///          Σ subtotal + fees - discount - coupon ──► Order.total
///                                                        │
///          Payment.amount ──► CashSession.total_<method> │
///                                                        ▼
///                                 Reward accrual • Card fees • DRE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from centavos.
    ///
    /// ## Example
    /// ```rust
    /// use sorveteria_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from reais and centavos.
    ///
    /// ## Example
    /// ```rust
    /// use sorveteria_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
    /// assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    /// ```
    ///
    /// ## Note
    /// For negative amounts, only the major unit should be negative.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in centavos.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the reais portion.
    #[inline]
    pub const fn reais(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the centavos portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Returns the smaller of two amounts.
    #[inline]
    pub fn min(self, other: Money) -> Money {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// Returns the larger of two amounts.
    #[inline]
    pub fn max(self, other: Money) -> Money {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }

    /// Applies a rate with half-up rounding.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`. The +5000 provides the
    /// rounding (5000/10000 = 0.5). Negative amounts round symmetrically.
    ///
    /// ## Example
    /// ```rust
    /// use sorveteria_core::money::{Money, Rate};
    ///
    /// // R$10.00 at 8.25% = R$0.825 → R$0.83
    /// let fee = Money::from_cents(1000).apply_rate(Rate::from_bps(825));
    /// assert_eq!(fee.cents(), 83);
    /// ```
    pub fn apply_rate(&self, rate: Rate) -> Money {
        // i128 prevents overflow on large amounts
        let product = self.0 as i128 * rate.bps() as i128;
        let rounded = if product >= 0 {
            (product + 5000) / 10000
        } else {
            (product - 5000) / 10000
        };
        Money(rounded as i64)
    }

    /// Applies a rate, discarding any fraction of a centavo.
    pub fn apply_rate_floor(&self, rate: Rate) -> Money {
        let product = self.0 as i128 * rate.bps() as i128;
        Money(product.div_euclid(10000) as i64)
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use sorveteria_core::money::Money;
    ///
    /// let line_total = Money::from_cents(299).multiply_quantity(3);
    /// assert_eq!(line_total.cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Prices a weight in grams against a per-kilogram price (half-up).
    ///
    /// ## Example
    /// ```rust
    /// use sorveteria_core::money::Money;
    ///
    /// // R$59.90/kg, 350g → R$20.965 → R$20.97
    /// let line = Money::from_cents(5990).per_kilogram(350);
    /// assert_eq!(line.cents(), 2097);
    /// ```
    pub fn per_kilogram(&self, grams: i64) -> Money {
        let product = self.0 as i128 * grams as i128;
        Money(((product + 500) / 1000) as i64)
    }

    /// Divides by `parts` with half-up rounding.
    ///
    /// Used for the per-flavor price of an assembled cup.
    /// Returns the amount unchanged when `parts` is not positive.
    pub fn divide_round(&self, parts: i64) -> Money {
        if parts <= 0 {
            return *self;
        }
        let numerator = self.0 as i128 * 2 + parts as i128;
        Money((numerator / (parts as i128 * 2)) as i64)
    }

    /// Applies a percentage discount and returns the discounted amount.
    pub fn apply_percentage_discount(&self, rate: Rate) -> Money {
        *self - self.apply_rate(rate)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows the amount the way receipts print it.
///
/// ## Note
/// For debugging and logs. The front end formats for locale (`R$ 10,99`).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}R${}.{:02}", sign, self.reais().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
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

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i32> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i32) -> Self {
        Money(self.0 * qty as i64)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Rate
// =============================================================================

/// A rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// - 199 bps = 1.99% (credit card fee)
/// - 500 bps = 5% (cashback)
/// - 10000 bps = multiplier 1.0 (1 loyalty point per R$1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Rate(u32);

impl Rate {
    /// Creates a rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Rate(bps)
    }

    /// Creates a rate from a percentage (for convenience).
    pub fn from_percentage(pct: f64) -> Self {
        Rate((pct * 100.0).round().max(0.0) as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
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
}

impl Default for Rate {
    fn default() -> Self {
        Rate::zero()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.reais(), 10);
        assert_eq!(money.cents_part(), 99);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "R$10.99");
        assert_eq!(format!("{}", Money::from_cents(500)), "R$5.00");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-R$5.50");
        assert_eq!(format!("{}", Money::zero()), "R$0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((-a).cents(), -1000);
        let result: Money = a * 3;
        assert_eq!(result.cents(), 3000);
        let total: Money = [a, b, b].iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_apply_rate_rounding() {
        let amount = Money::from_cents(1000);
        assert_eq!(amount.apply_rate(Rate::from_bps(1000)).cents(), 100);
        assert_eq!(amount.apply_rate(Rate::from_bps(825)).cents(), 83);
        assert_eq!(Money::from_cents(-1000).apply_rate(Rate::from_bps(825)).cents(), -83);
        assert_eq!(amount.apply_rate_floor(Rate::from_bps(825)).cents(), 82);
    }

    #[test]
    fn test_per_kilogram() {
        assert_eq!(Money::from_cents(5990).per_kilogram(1000).cents(), 5990);
        assert_eq!(Money::from_cents(5990).per_kilogram(500).cents(), 2995);
        assert_eq!(Money::from_cents(5990).per_kilogram(350).cents(), 2097);
    }

    #[test]
    fn test_divide_round() {
        assert_eq!(Money::from_cents(1000).divide_round(3).cents(), 333);
        assert_eq!(Money::from_cents(1000).divide_round(2).cents(), 500);
        assert_eq!(Money::from_cents(1001).divide_round(2).cents(), 501);
        assert_eq!(Money::from_cents(1000).divide_round(0).cents(), 1000);
    }

    #[test]
    fn test_percentage_discount() {
        let subtotal = Money::from_cents(10000);
        assert_eq!(subtotal.apply_percentage_discount(Rate::from_bps(1000)).cents(), 9000);
    }

    #[test]
    fn test_rate_from_percentage() {
        assert_eq!(Rate::from_percentage(1.99).bps(), 199);
        assert!((Rate::from_bps(825).percentage() - 8.25).abs() < 0.001);
        assert_eq!(Rate::from_percentage(-3.0).bps(), 0);
    }

    /// A three-flavor cup of R$10.00 loses one centavo when split.
    /// The order total is the sum of the split lines, never the size price.
    #[test]
    fn test_division_precision_loss_documented() {
        let cup = Money::from_cents(1000);
        let per_flavor = cup.divide_round(3);
        let reconstructed: Money = per_flavor * 3;

        assert_eq!(reconstructed.cents(), 999);
        assert_eq!((cup - reconstructed).cents(), 1);
    }
}
