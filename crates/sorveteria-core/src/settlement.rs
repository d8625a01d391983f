//! # Settlement Request and Totals
//!
//! The channel-neutral shape every sale, comanda close and delivery order is
//! reduced to before the engine runs it.
//!
//! ## Total Formula
//! ```text
//! subtotal        = Σ line.subtotal
//! coupon_base     = subtotal + additional_fee + delivery_fee - discount
//! total           = coupon_base - coupon_discount
//!
//! total < 0  →  ValidationError::NegativeTotal (never clamped)
//!
//! change          = max(Σ payments - total, 0)   taken out of the cash rows
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;
use crate::pricing::{ItemRequest, PricedLine};
use crate::types::PaymentMethod;
use crate::validation::{
    validate_item_count, validate_non_negative_cents, validate_payment_count,
    validate_positive_cents, ValidationResult,
};

// =============================================================================
// Request DTOs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

impl PaymentRequest {
    pub const fn new(method: PaymentMethod, amount_cents: i64) -> Self {
        PaymentRequest {
            method,
            amount_cents,
        }
    }

    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

/// Inbound settlement request shared by all channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettlementRequest {
    pub cash_session_id: String,
    pub customer_id: Option<String>,
    pub coupon_code: Option<String>,
    pub items: Vec<ItemRequest>,
    pub payments: Vec<PaymentRequest>,
    /// Manual discount given at the counter.
    #[serde(default)]
    pub discount_cents: i64,
    /// Service charge or packaging fee.
    #[serde(default)]
    pub additional_fee_cents: i64,
    /// Only meaningful for delivery orders.
    #[serde(default)]
    pub delivery_fee_cents: i64,
    /// Authenticated operator performing the settlement.
    pub operator_id: String,
    pub notes: Option<String>,
}

impl SettlementRequest {
    /// Shape checks that need no store access.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.cash_session_id.trim().is_empty() {
            return Err(ValidationError::required("cash_session_id"));
        }
        if self.operator_id.trim().is_empty() {
            return Err(ValidationError::required("operator_id"));
        }
        validate_item_count(self.items.len())?;
        validate_payments(&self.payments)?;
        self.validate_adjustments()
    }

    /// Fee and discount checks, shared with comanda close where items are already stored.
    pub fn validate_adjustments(&self) -> ValidationResult<()> {
        validate_non_negative_cents("discount", self.discount_cents)?;
        validate_non_negative_cents("additional_fee", self.additional_fee_cents)?;
        validate_non_negative_cents("delivery_fee", self.delivery_fee_cents)?;
        Ok(())
    }
}

/// At least one payment row, every amount positive.
pub fn validate_payments(payments: &[PaymentRequest]) -> ValidationResult<()> {
    validate_payment_count(payments.len())?;
    for payment in payments {
        validate_positive_cents("payment amount", payment.amount_cents)?;
    }
    Ok(())
}

/// Sum of payment amounts.
pub fn payments_sum(payments: &[PaymentRequest]) -> Money {
    payments.iter().map(|p| p.amount()).sum()
}

/// Payments as applied to an order, and the cash handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPayments {
    pub payments: Vec<PaymentRequest>,
    pub change: Money,
}

/// Takes the change owed out of the cash rows, last row first, so that the
/// stored payments never exceed `total`. Cash rows that reach zero are
/// dropped. Only cash can be overpaid.
pub fn apply_change(payments: &[PaymentRequest], total: Money) -> CoreResult<AppliedPayments> {
    let excess = payments_sum(payments) - total;
    if !excess.is_positive() {
        return Ok(AppliedPayments {
            payments: payments.to_vec(),
            change: Money::zero(),
        });
    }

    let cash: Money = payments
        .iter()
        .filter(|p| p.method == PaymentMethod::Cash)
        .map(|p| p.amount())
        .sum();
    if cash < excess {
        return Err(ValidationError::NonCashOverpayment {
            excess_cents: excess.cents(),
            cash_cents: cash.cents(),
        }
        .into());
    }

    let mut remaining = excess.cents();
    let mut applied = payments.to_vec();
    for payment in applied.iter_mut().rev().filter(|p| p.method == PaymentMethod::Cash) {
        let taken = remaining.min(payment.amount_cents);
        payment.amount_cents -= taken;
        remaining -= taken;
        if remaining == 0 {
            break;
        }
    }
    applied.retain(|p| p.amount_cents > 0);

    Ok(AppliedPayments {
        payments: applied,
        change: excess,
    })
}

// =============================================================================
// Totals
// =============================================================================

/// Monetary breakdown of a settlement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettlementTotals {
    pub subtotal: Money,
    pub additional_fee: Money,
    pub delivery_fee: Money,
    pub discount: Money,
    pub coupon_discount: Money,
    pub total: Money,
}

impl SettlementTotals {
    /// Totals before any coupon.
    pub fn new(lines: &[PricedLine], additional_fee: Money, delivery_fee: Money, discount: Money) -> Self {
        let subtotal: Money = lines.iter().map(|l| l.subtotal).sum();
        let mut totals = SettlementTotals {
            subtotal,
            additional_fee,
            delivery_fee,
            discount,
            coupon_discount: Money::zero(),
            total: Money::zero(),
        };
        totals.total = totals.coupon_base();
        totals
    }

    /// Amount a coupon is evaluated against.
    pub fn coupon_base(&self) -> Money {
        self.subtotal + self.additional_fee + self.delivery_fee - self.discount
    }

    pub fn with_coupon(mut self, coupon_discount: Money) -> Self {
        self.coupon_discount = coupon_discount;
        self.total = self.coupon_base() - coupon_discount;
        self
    }

    /// Rejects a negative total.
    pub fn finalize(self) -> CoreResult<Self> {
        if self.total.is_negative() {
            return Err(ValidationError::NegativeTotal {
                total_cents: self.total.cents(),
            }
            .into());
        }
        Ok(self)
    }
}

// =============================================================================
// Order Numbers
// =============================================================================

/// Two-character terminal code: last two alphanumerics, upper-cased, zero-padded.
pub fn terminal_code(terminal_id: &str) -> String {
    let tail: Vec<char> = terminal_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let start = tail.len().saturating_sub(2);
    format!("{:0>2}", tail[start..].iter().collect::<String>())
}

/// Generates an order number in format `YYYYMMDD-TT-NNNN`.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use sorveteria_core::settlement::order_number;
///
/// let date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
/// assert_eq!(order_number(date, "T1", 7), "20260131-T1-0007");
/// ```
pub fn order_number(date: NaiveDate, terminal_id: &str, sequence: i64) -> String {
    format!(
        "{}-{}-{:04}",
        date.format("%Y%m%d"),
        terminal_code(terminal_id),
        sequence
    )
}

/// Prefix shared by every order number of a terminal on a day.
pub fn order_number_prefix(date: NaiveDate, terminal_id: &str) -> String {
    format!("{}-{}-", date.format("%Y%m%d"), terminal_code(terminal_id))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::SaleType;

    fn line(subtotal: i64) -> PricedLine {
        PricedLine {
            product_id: "p".to_string(),
            product_name: "Casquinha".to_string(),
            sale_type: SaleType::Unit,
            size_id: None,
            size_name: None,
            flavor_count: None,
            quantity: 1,
            weight_grams: None,
            unit_price: Money::from_cents(subtotal),
            cost: Money::zero(),
            subtotal: Money::from_cents(subtotal),
            track_stock: false,
            stock_quantity: 1,
        }
    }

    fn request() -> SettlementRequest {
        SettlementRequest {
            cash_session_id: "s1".to_string(),
            customer_id: None,
            coupon_code: None,
            items: vec![ItemRequest::unit("p", 1)],
            payments: vec![PaymentRequest::new(PaymentMethod::Cash, 1000)],
            discount_cents: 0,
            additional_fee_cents: 0,
            delivery_fee_cents: 0,
            operator_id: "op".to_string(),
            notes: None,
        }
    }

    #[test]
    fn test_totals_formula() {
        let totals = SettlementTotals::new(
            &[line(1800), line(1800)],
            Money::from_cents(200),
            Money::from_cents(500),
            Money::from_cents(300),
        )
        .with_coupon(Money::from_cents(400))
        .finalize()
        .unwrap();

        assert_eq!(totals.subtotal.cents(), 3600);
        assert_eq!(totals.coupon_base().cents(), 4000);
        assert_eq!(totals.total.cents(), 3600);
        assert_eq!(
            totals.subtotal + totals.additional_fee + totals.delivery_fee
                - totals.discount
                - totals.coupon_discount,
            totals.total
        );
    }

    #[test]
    fn test_negative_total_rejected() {
        let err = SettlementTotals::new(&[line(500)], Money::zero(), Money::zero(), Money::from_cents(600))
            .finalize()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let mut no_payments = request();
        no_payments.payments.clear();
        assert!(no_payments.validate().is_err());

        let mut zero_payment = request();
        zero_payment.payments = vec![PaymentRequest::new(PaymentMethod::Pix, 0)];
        assert!(zero_payment.validate().is_err());

        let mut negative_fee = request();
        negative_fee.additional_fee_cents = -1;
        assert!(negative_fee.validate().is_err());

        let mut no_items = request();
        no_items.items.clear();
        assert!(no_items.validate().is_err());
    }

    #[test]
    fn test_change_comes_out_of_cash() {
        let applied = apply_change(
            &[
                PaymentRequest::new(PaymentMethod::Pix, 1000),
                PaymentRequest::new(PaymentMethod::Cash, 5000),
            ],
            Money::from_cents(3600),
        )
        .unwrap();
        assert_eq!(applied.change.cents(), 2400);
        assert_eq!(
            applied.payments,
            vec![
                PaymentRequest::new(PaymentMethod::Pix, 1000),
                PaymentRequest::new(PaymentMethod::Cash, 2600),
            ]
        );
        assert_eq!(payments_sum(&applied.payments).cents(), 3600);

        // A cash row fully given back disappears.
        let applied = apply_change(
            &[
                PaymentRequest::new(PaymentMethod::Credit, 3600),
                PaymentRequest::new(PaymentMethod::Cash, 500),
            ],
            Money::from_cents(3600),
        )
        .unwrap();
        assert_eq!(applied.payments, vec![PaymentRequest::new(PaymentMethod::Credit, 3600)]);
        assert_eq!(applied.change.cents(), 500);

        let exact = [PaymentRequest::new(PaymentMethod::Debit, 3600)];
        let applied = apply_change(&exact, Money::from_cents(3600)).unwrap();
        assert!(applied.change.is_zero());
        assert_eq!(applied.payments, exact.to_vec());
    }

    #[test]
    fn test_card_overpayment_rejected() {
        let err = apply_change(
            &[
                PaymentRequest::new(PaymentMethod::Credit, 4000),
                PaymentRequest::new(PaymentMethod::Cash, 200),
            ],
            Money::from_cents(3600),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_order_number() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(order_number(date, "caixa-02", 12), "20260309-02-0012");
        assert_eq!(order_number(date, "7", 1), "20260309-07-0001");
        assert_eq!(order_number_prefix(date, "T1"), "20260309-T1-");
    }
}
