//! # Reward Calculation
//!
//! Loyalty points and cashback accrual, plus balance rules for redemption,
//! reversal and manual adjustment. Pure functions of (config, total, lines).
//!
//! ## Accrual
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  inactive or total < min_purchase          → 0                          │
//! │                                                                         │
//! │  earning base (by eligibility)                                          │
//! │  ├── applies to all products               → total                      │
//! │  ├── no eligible line                      → 0                          │
//! │  ├── WholeTotal                            → total                      │
//! │  └── ProRated                              → total × eligible / subtotal│
//! │                                                                         │
//! │  points   = floor(base in reais × points_per_real)                      │
//! │  cashback = base × percentage, capped at max_cashback_per_purchase      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, Rate};
use crate::pricing::PricedLine;
use crate::types::{
    CashbackConfig, CashbackTransaction, Customer, EligibilityPolicy, LoyaltyConfig,
    LoyaltyTransaction, ProductEligibility,
};

// =============================================================================
// Earning Base
// =============================================================================

/// Portion of `total` that earns rewards under `eligibility`.
pub fn earning_base(total: Money, lines: &[PricedLine], eligibility: &ProductEligibility) -> Money {
    if eligibility.applies_to_all_products {
        return total;
    }

    let eligible: Money = lines
        .iter()
        .filter(|l| eligibility.is_eligible(&l.product_id))
        .map(|l| l.subtotal)
        .sum();

    if eligible.is_zero() {
        return Money::zero();
    }

    match eligibility.policy {
        EligibilityPolicy::WholeTotal => total,
        EligibilityPolicy::ProRated => {
            let subtotal: Money = lines.iter().map(|l| l.subtotal).sum();
            if !subtotal.is_positive() {
                return Money::zero();
            }
            let scaled = total.cents() as i128 * eligible.cents() as i128 / subtotal.cents() as i128;
            Money::from_cents(scaled as i64)
        }
    }
}

// =============================================================================
// Calculations
// =============================================================================

/// Points earned on a settlement.
///
/// ## Example
/// ```rust
/// use sorveteria_core::money::{Money, Rate};
/// use sorveteria_core::rewards::calculate_points;
/// use sorveteria_core::types::LoyaltyConfig;
///
/// let config = LoyaltyConfig {
///     active: true,
///     points_per_real: Rate::from_bps(10_000),
///     ..Default::default()
/// };
/// assert_eq!(calculate_points(&config, Money::from_cents(3_699), &[]), 36);
/// ```
pub fn calculate_points(config: &LoyaltyConfig, total: Money, lines: &[PricedLine]) -> i64 {
    if !config.active || total < config.min_purchase || !total.is_positive() {
        return 0;
    }

    let base = earning_base(total, lines, &config.eligibility);
    points_for(base, config.points_per_real)
}

/// Points for an amount: floor(centavos × bps / 1_000_000).
pub fn points_for(amount: Money, points_per_real: Rate) -> i64 {
    if !amount.is_positive() {
        return 0;
    }
    (amount.cents() as i128 * points_per_real.bps() as i128 / 1_000_000) as i64
}

/// Cashback earned on a settlement, capped per purchase.
pub fn calculate_cashback(config: &CashbackConfig, total: Money, lines: &[PricedLine]) -> Money {
    if !config.active || total < config.min_purchase || !total.is_positive() {
        return Money::zero();
    }

    let base = earning_base(total, lines, &config.eligibility);
    let earned = base.apply_rate(config.percentage);

    match config.max_cashback_per_purchase {
        Some(cap) => earned.min(cap),
        None => earned,
    }
}

/// Everything a customer earns on one settlement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RewardAccrual {
    pub points: i64,
    pub cashback: Money,
    #[ts(as = "Option<String>")]
    pub points_expire_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cashback_expires_at: Option<DateTime<Utc>>,
}

impl RewardAccrual {
    pub fn is_empty(&self) -> bool {
        self.points == 0 && self.cashback.is_zero()
    }
}

pub fn accrue(
    loyalty: &LoyaltyConfig,
    cashback: &CashbackConfig,
    total: Money,
    lines: &[PricedLine],
    now: DateTime<Utc>,
) -> RewardAccrual {
    let points = calculate_points(loyalty, total, lines);
    let cashback_amount = calculate_cashback(cashback, total, lines);

    RewardAccrual {
        points,
        cashback: cashback_amount,
        points_expire_at: expiry(points > 0, loyalty.expiration_days, now),
        cashback_expires_at: expiry(cashback_amount.is_positive(), cashback.expiration_days, now),
    }
}

fn expiry(earned: bool, days: Option<i64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match days {
        Some(days) if earned && days > 0 => Some(now + Duration::days(days)),
        _ => None,
    }
}

// =============================================================================
// Balance Rules
// =============================================================================

/// Fails with `InsufficientBalance` when `requested` exceeds `available`.
pub fn ensure_balance(balance: &str, available: i64, requested: i64) -> CoreResult<()> {
    if requested > available {
        return Err(CoreError::InsufficientBalance {
            balance: balance.to_string(),
            available,
            requested,
        });
    }
    Ok(())
}

/// How much of an earn can be taken back without driving the balance below zero.
pub fn bounded_reversal(balance: i64, earned: i64) -> i64 {
    earned.min(balance).max(0)
}

/// Balance after a signed manual adjustment. Never below zero.
pub fn adjusted_balance(balance: &str, current: i64, delta: i64) -> CoreResult<i64> {
    let after = current + delta;
    if after < 0 {
        return Err(CoreError::InsufficientBalance {
            balance: balance.to_string(),
            available: current,
            requested: -delta,
        });
    }
    Ok(after)
}

// =============================================================================
// Audit
// =============================================================================

/// Stored balances against what the ledgers say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerAudit {
    pub customer_id: String,
    pub stored_points: i64,
    pub ledger_points: i64,
    pub stored_cashback_cents: i64,
    pub ledger_cashback_cents: i64,
    /// Rows whose `balance_after` does not match the running sum.
    pub broken_snapshots: usize,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored_points == self.ledger_points
            && self.stored_cashback_cents == self.ledger_cashback_cents
            && self.broken_snapshots == 0
    }
}

/// Recomputes balances from ledger rows (oldest first).
pub fn audit_ledgers(
    customer: &Customer,
    loyalty: &[LoyaltyTransaction],
    cashback: &[CashbackTransaction],
) -> LedgerAudit {
    let mut broken = 0;

    let mut points = 0;
    for row in loyalty {
        points += row.points;
        if row.balance_after != points {
            broken += 1;
        }
    }

    let mut cents = 0;
    for row in cashback {
        cents += row.amount_cents;
        if row.balance_after_cents != cents {
            broken += 1;
        }
    }

    LedgerAudit {
        customer_id: customer.id.clone(),
        stored_points: customer.loyalty_points,
        ledger_points: points,
        stored_cashback_cents: customer.cashback_balance_cents,
        ledger_cashback_cents: cents,
        broken_snapshots: broken,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{RewardEntryType, SaleType};

    fn line(product_id: &str, subtotal: i64) -> PricedLine {
        PricedLine {
            product_id: product_id.to_string(),
            product_name: product_id.to_string(),
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

    fn loyalty(eligibility: ProductEligibility) -> LoyaltyConfig {
        LoyaltyConfig {
            active: true,
            points_per_real: Rate::from_bps(10_000),
            min_purchase: Money::from_cents(1000),
            eligibility,
            expiration_days: Some(90),
        }
    }

    #[test]
    fn test_inactive_and_minimum() {
        let mut config = loyalty(ProductEligibility::all());
        assert_eq!(calculate_points(&config, Money::from_cents(999), &[]), 0);
        assert_eq!(calculate_points(&config, Money::from_cents(1000), &[]), 10);
        config.active = false;
        assert_eq!(calculate_points(&config, Money::from_cents(5000), &[]), 0);
        assert_eq!(
            calculate_cashback(&CashbackConfig::default(), Money::from_cents(5000), &[]),
            Money::zero()
        );
    }

    #[test]
    fn test_points_rate() {
        // 1.5 points per real
        assert_eq!(points_for(Money::from_cents(3600), Rate::from_bps(15_000)), 54);
        assert_eq!(points_for(Money::from_cents(99), Rate::from_bps(10_000)), 0);
    }

    /// Whole-total: one eligible line makes the entire total count.
    #[test]
    fn test_whole_total_policy() {
        let lines = [line("acai", 3000), line("agua", 1000)];
        let config = loyalty(ProductEligibility::only(["acai"], EligibilityPolicy::WholeTotal));
        assert_eq!(calculate_points(&config, Money::from_cents(4000), &lines), 40);

        let none = [line("agua", 4000)];
        assert_eq!(calculate_points(&config, Money::from_cents(4000), &none), 0);
    }

    /// Pro-rated: the total is scaled by the eligible share of the item subtotal.
    #[test]
    fn test_pro_rated_policy() {
        let lines = [line("acai", 3000), line("agua", 1000)];
        let config = loyalty(ProductEligibility::only(["acai"], EligibilityPolicy::ProRated));
        // total after a R$4.00 coupon: 36.00 → eligible share 75% → 27.00
        assert_eq!(calculate_points(&config, Money::from_cents(3600), &lines), 27);
        assert_eq!(
            earning_base(Money::from_cents(3600), &lines, &config.eligibility).cents(),
            2700
        );
    }

    #[test]
    fn test_cashback_cap() {
        let config = CashbackConfig {
            active: true,
            percentage: Rate::from_bps(500),
            min_purchase: Money::zero(),
            max_cashback_per_purchase: Some(Money::from_cents(150)),
            eligibility: ProductEligibility::all(),
            expiration_days: None,
        };
        assert_eq!(calculate_cashback(&config, Money::from_cents(2000), &[]).cents(), 100);
        assert_eq!(calculate_cashback(&config, Money::from_cents(10_000), &[]).cents(), 150);
    }

    #[test]
    fn test_accrual_expiry() {
        let now = Utc::now();
        let accrual = accrue(
            &loyalty(ProductEligibility::all()),
            &CashbackConfig::default(),
            Money::from_cents(3600),
            &[],
            now,
        );
        assert_eq!(accrual.points, 36);
        assert_eq!(accrual.points_expire_at, Some(now + Duration::days(90)));
        assert!(accrual.cashback.is_zero());
        assert!(accrual.cashback_expires_at.is_none());
    }

    #[test]
    fn test_balance_rules() {
        assert!(ensure_balance("points", 50, 50).is_ok());
        let err = ensure_balance("points", 50, 51).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

        assert_eq!(bounded_reversal(10, 36), 10);
        assert_eq!(bounded_reversal(100, 36), 36);
        assert_eq!(bounded_reversal(-5, 36), 0);

        assert_eq!(adjusted_balance("points", 10, -10).unwrap(), 0);
        assert!(adjusted_balance("points", 10, -11).is_err());
    }

    #[test]
    fn test_audit_detects_drift() {
        let now = Utc::now();
        let mut customer = Customer {
            id: "c1".to_string(),
            name: "Ana".to_string(),
            email: None,
            cpf: None,
            phone: None,
            loyalty_points: 26,
            cashback_balance_cents: 0,
            active: true,
            created_at: now,
            updated_at: now,
        };
        let row = |points: i64, balance_after: i64, entry_type| LoyaltyTransaction {
            id: format!("l{}", balance_after),
            customer_id: "c1".to_string(),
            entry_type,
            points,
            balance_after,
            channel: None,
            order_id: None,
            description: None,
            expires_at: None,
            created_at: now,
        };
        let rows = vec![
            row(36, 36, RewardEntryType::Earn),
            row(-10, 26, RewardEntryType::Redeem),
        ];

        assert!(audit_ledgers(&customer, &rows, &[]).is_consistent());

        customer.loyalty_points = 30;
        let audit = audit_ledgers(&customer, &rows, &[]);
        assert!(!audit.is_consistent());
        assert_eq!(audit.ledger_points, 26);
    }
}
