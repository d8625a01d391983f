//! # Payment-Method Fees and Ledger Reference Keys
//!
//! Reference keys are the idempotency contract of the reconciliation jobs:
//! a job re-run finds its earlier output by exact key match.
//!
//! ## Key Formats
//! ```text
//! CARD_FEE-{SALE|COMANDA|DELIVERY}-{orderId}-{method}   card fee expense
//! CASHSESSION-{sessionId}                               session revenue
//! PAYABLE-{id}     (legacy: AP-{id})                    account payable
//! RECEIVABLE-{id}  (legacy: AR-{id})                    account receivable
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::money::{Money, Rate};
use crate::types::{AccountKind, Channel, PaymentMethod, PaymentMethodConfig};

/// Accounting category of card-fee expense rows.
pub const CARD_FEE_CATEGORY: &str = "card_fee";

/// Accounting category of session revenue rows.
pub const SALES_CATEGORY: &str = "sales";

pub const CARD_FEE_PREFIX: &str = "CARD_FEE-";
pub const CASH_SESSION_PREFIX: &str = "CASHSESSION-";

// =============================================================================
// Reference Keys
// =============================================================================

pub fn card_fee_reference(channel: Channel, order_id: &str, method: PaymentMethod) -> String {
    format!(
        "{}{}-{}-{}",
        CARD_FEE_PREFIX,
        channel.reference_tag(),
        order_id,
        method.as_str()
    )
}

pub fn cash_session_reference(session_id: &str) -> String {
    format!("{}{}", CASH_SESSION_PREFIX, session_id)
}

pub fn account_reference(kind: AccountKind, account_id: &str) -> String {
    match kind {
        AccountKind::Payable => format!("PAYABLE-{}", account_id),
        AccountKind::Receivable => format!("RECEIVABLE-{}", account_id),
    }
}

pub fn legacy_account_reference(kind: AccountKind, account_id: &str) -> String {
    match kind {
        AccountKind::Payable => format!("AP-{}", account_id),
        AccountKind::Receivable => format!("AR-{}", account_id),
    }
}

/// Ledger rows derived from orders or sessions. Reports that already count
/// orders directly must skip these to avoid counting revenue twice.
pub fn is_derived_reference(reference: &str) -> bool {
    reference.starts_with(CARD_FEE_PREFIX) || reference.starts_with(CASH_SESSION_PREFIX)
}

// =============================================================================
// Fee Computation
// =============================================================================

/// One fee expense to book for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CardFee {
    pub method: PaymentMethod,
    /// Amount paid with this method.
    pub base: Money,
    pub rate: Rate,
    pub fee: Money,
}

/// Sums payment amounts per method.
pub fn group_by_method<I>(payments: I) -> BTreeMap<PaymentMethod, Money>
where
    I: IntoIterator<Item = (PaymentMethod, Money)>,
{
    let mut grouped = BTreeMap::new();
    for (method, amount) in payments {
        *grouped.entry(method).or_insert_with(Money::zero) += amount;
    }
    grouped
}

/// Fee rate configured for a method. Missing or inactive config means no fee.
pub fn fee_rate(configs: &[PaymentMethodConfig], method: PaymentMethod) -> Rate {
    configs
        .iter()
        .find(|c| c.method == method && c.active)
        .map(|c| c.fee)
        .unwrap_or_else(Rate::zero)
}

/// Fees to book for an order's payments: one per method with a positive fee.
///
/// ## Example
/// ```rust
/// use sorveteria_core::fees::compute_card_fees;
/// use sorveteria_core::money::{Money, Rate};
/// use sorveteria_core::types::{PaymentMethod, PaymentMethodConfig};
///
/// let configs = [PaymentMethodConfig { method: PaymentMethod::Credit, fee: Rate::from_bps(199), active: true }];
/// let fees = compute_card_fees(
///     [(PaymentMethod::Credit, Money::from_cents(3600)), (PaymentMethod::Cash, Money::from_cents(500))],
///     &configs,
/// );
/// assert_eq!(fees.len(), 1);
/// assert_eq!(fees[0].fee.cents(), 72);
/// ```
pub fn compute_card_fees<I>(payments: I, configs: &[PaymentMethodConfig]) -> Vec<CardFee>
where
    I: IntoIterator<Item = (PaymentMethod, Money)>,
{
    group_by_method(payments)
        .into_iter()
        .filter_map(|(method, base)| {
            let rate = fee_rate(configs, method);
            let fee = base.apply_rate(rate);
            fee.is_positive().then_some(CardFee {
                method,
                base,
                rate,
                fee,
            })
        })
        .collect()
}
