//! # Cash Session Rules
//!
//! The till state machine and the per-method running totals.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌────────┐  cashier_close   ┌────────────────┐  manager_close  ┌────────────────┐
//! │   │  open  │ ───────────────► │ cashier_closed │ ──────────────► │ manager_closed │
//! │   └────────┘                  └────────────────┘                 └────────────────┘
//! │       │                                                              (terminal)
//! │       └── only state that accepts settlements and reversals            │
//! │                                                                         │
//! │   Any other transition fails with InvalidState.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{CashSession, CashSessionStatus, OrderPayment, PaymentMethod};

// =============================================================================
// Transitions
// =============================================================================

/// Checks that `from → to` is one of the two allowed moves.
pub fn ensure_transition(
    session_id: &str,
    from: CashSessionStatus,
    to: CashSessionStatus,
) -> CoreResult<()> {
    let allowed = matches!(
        (from, to),
        (CashSessionStatus::Open, CashSessionStatus::CashierClosed)
            | (CashSessionStatus::CashierClosed, CashSessionStatus::ManagerClosed)
    );

    if allowed {
        Ok(())
    } else {
        Err(CoreError::invalid_state(
            "CashSession",
            session_id,
            format!("cannot move from {} to {}", from, to),
        ))
    }
}

/// Fails unless the session can take settlements.
pub fn ensure_open(session: &CashSession) -> CoreResult<()> {
    if session.is_open() {
        Ok(())
    } else {
        Err(CoreError::invalid_state(
            "CashSession",
            &session.id,
            format!("session is {}, expected open", session.status),
        ))
    }
}

/// Counted cash minus the cash recorded by sales. The opening float is not part of either side.
pub fn cashier_difference(counted_cash: Money, total_cash: Money) -> Money {
    counted_cash - total_cash
}

// =============================================================================
// Totals
// =============================================================================

/// Per-method totals plus the grand total, as kept on a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionTotals {
    pub cash: Money,
    pub debit: Money,
    pub credit: Money,
    pub pix: Money,
    pub other: Money,
    pub sales: Money,
}

impl SessionTotals {
    pub fn of(session: &CashSession) -> Self {
        SessionTotals {
            cash: Money::from_cents(session.total_cash_cents),
            debit: Money::from_cents(session.total_debit_cents),
            credit: Money::from_cents(session.total_credit_cents),
            pix: Money::from_cents(session.total_pix_cents),
            other: Money::from_cents(session.total_other_cents),
            sales: Money::from_cents(session.total_sales_cents),
        }
    }

    /// Movement of one settled order: payments per method, order total as sales.
    pub fn for_order<I>(payments: I, order_total: Money) -> Self
    where
        I: IntoIterator<Item = (PaymentMethod, Money)>,
    {
        let mut totals = SessionTotals {
            sales: order_total,
            ..Default::default()
        };
        for (method, amount) in payments {
            totals.add_payment(method, amount);
        }
        totals
    }

    /// Movement derived from stored payment rows.
    pub fn from_payments(payments: &[OrderPayment], order_total: Money) -> Self {
        SessionTotals::for_order(payments.iter().map(|p| (p.method, p.amount())), order_total)
    }

    pub fn add_payment(&mut self, method: PaymentMethod, amount: Money) {
        *self.slot_mut(method) += amount;
    }

    pub fn get(&self, method: PaymentMethod) -> Money {
        match method {
            PaymentMethod::Cash => self.cash,
            PaymentMethod::Debit => self.debit,
            PaymentMethod::Credit => self.credit,
            PaymentMethod::Pix => self.pix,
            PaymentMethod::Other => self.other,
        }
    }

    fn slot_mut(&mut self, method: PaymentMethod) -> &mut Money {
        match method {
            PaymentMethod::Cash => &mut self.cash,
            PaymentMethod::Debit => &mut self.debit,
            PaymentMethod::Credit => &mut self.credit,
            PaymentMethod::Pix => &mut self.pix,
            PaymentMethod::Other => &mut self.other,
        }
    }

    /// Sum of the five per-method totals.
    pub fn payments_total(&self) -> Money {
        PaymentMethod::ALL.iter().map(|m| self.get(*m)).sum()
    }

    pub fn negated(&self) -> Self {
        SessionTotals {
            cash: -self.cash,
            debit: -self.debit,
            credit: -self.credit,
            pix: -self.pix,
            other: -self.other,
            sales: -self.sales,
        }
    }

    pub fn merge(&mut self, other: &SessionTotals) {
        self.cash += other.cash;
        self.debit += other.debit;
        self.credit += other.credit;
        self.pix += other.pix;
        self.other += other.other;
        self.sales += other.sales;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(ensure_transition("s", CashSessionStatus::Open, CashSessionStatus::CashierClosed).is_ok());
        assert!(ensure_transition(
            "s",
            CashSessionStatus::CashierClosed,
            CashSessionStatus::ManagerClosed
        )
        .is_ok());
    }

    #[test]
    fn test_rejected_transitions() {
        use CashSessionStatus::*;
        for (from, to) in [
            (Open, ManagerClosed),
            (Open, Open),
            (CashierClosed, Open),
            (CashierClosed, CashierClosed),
            (ManagerClosed, Open),
            (ManagerClosed, CashierClosed),
            (ManagerClosed, ManagerClosed),
        ] {
            let err = ensure_transition("s", from, to).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::InvalidState);
        }
    }

    #[test]
    fn test_cashier_difference_ignores_float() {
        let diff = cashier_difference(Money::from_cents(13_600), Money::from_cents(3_600));
        assert_eq!(diff.cents(), 10_000);
    }

    #[test]
    fn test_totals_for_split_payment() {
        let totals = SessionTotals::for_order(
            [
                (PaymentMethod::Cash, Money::from_cents(1000)),
                (PaymentMethod::Pix, Money::from_cents(2600)),
                (PaymentMethod::Cash, Money::from_cents(500)),
            ],
            Money::from_cents(4100),
        );
        assert_eq!(totals.cash.cents(), 1500);
        assert_eq!(totals.pix.cents(), 2600);
        assert_eq!(totals.sales.cents(), 4100);
        assert_eq!(totals.payments_total().cents(), 4100);

        let mut running = totals;
        running.merge(&totals.negated());
        assert_eq!(running, SessionTotals::default());
    }
}
