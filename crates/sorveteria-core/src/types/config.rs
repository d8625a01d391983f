//! Business configuration read by the reward and fee calculations.
//!
//! These values are loaded from the store once per operation and passed
//! explicitly into pure functions. A missing row means `Default`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use ts_rs::TS;

use crate::money::{Money, Rate};
use crate::types::cash::PaymentMethod;

// =============================================================================
// Product Eligibility
// =============================================================================

/// How the earning base is derived when only some lines are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityPolicy {
    /// Any eligible line makes the whole final total count.
    WholeTotal,
    /// Final total scaled by the eligible share of the item subtotal.
    ProRated,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        EligibilityPolicy::WholeTotal
    }
}

/// Which products earn rewards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductEligibility {
    pub applies_to_all_products: bool,
    pub eligible_product_ids: BTreeSet<String>,
    pub policy: EligibilityPolicy,
}

impl ProductEligibility {
    pub fn all() -> Self {
        ProductEligibility {
            applies_to_all_products: true,
            eligible_product_ids: BTreeSet::new(),
            policy: EligibilityPolicy::WholeTotal,
        }
    }

    pub fn only<I, S>(ids: I, policy: EligibilityPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProductEligibility {
            applies_to_all_products: false,
            eligible_product_ids: ids.into_iter().map(Into::into).collect(),
            policy,
        }
    }

    pub fn is_eligible(&self, product_id: &str) -> bool {
        self.applies_to_all_products || self.eligible_product_ids.contains(product_id)
    }
}

impl Default for ProductEligibility {
    fn default() -> Self {
        ProductEligibility::all()
    }
}

// =============================================================================
// Loyalty / Cashback
// =============================================================================

/// Singleton loyalty-program configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoyaltyConfig {
    pub active: bool,
    /// Points per R$1.00, in basis points (10000 = 1 point per real).
    pub points_per_real: Rate,
    pub min_purchase: Money,
    pub eligibility: ProductEligibility,
    /// Earned points expire after this many days, when set.
    pub expiration_days: Option<i64>,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        LoyaltyConfig {
            active: false,
            points_per_real: Rate::from_bps(10_000),
            min_purchase: Money::zero(),
            eligibility: ProductEligibility::all(),
            expiration_days: None,
        }
    }
}

/// Singleton cashback-program configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashbackConfig {
    pub active: bool,
    pub percentage: Rate,
    pub min_purchase: Money,
    pub max_cashback_per_purchase: Option<Money>,
    pub eligibility: ProductEligibility,
    pub expiration_days: Option<i64>,
}

impl Default for CashbackConfig {
    fn default() -> Self {
        CashbackConfig {
            active: false,
            percentage: Rate::zero(),
            min_purchase: Money::zero(),
            max_cashback_per_purchase: None,
            eligibility: ProductEligibility::all(),
            expiration_days: None,
        }
    }
}

// =============================================================================
// Payment Method Fees
// =============================================================================

/// Acquirer fee charged on a payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentMethodConfig {
    pub method: PaymentMethod,
    pub fee: Rate,
    pub active: bool,
}

impl PaymentMethodConfig {
    /// No fee: the documented default for a method without a row.
    pub const fn free(method: PaymentMethod) -> Self {
        PaymentMethodConfig {
            method,
            fee: Rate::zero(),
            active: true,
        }
    }
}
