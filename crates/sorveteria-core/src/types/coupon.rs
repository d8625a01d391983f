//! Coupons and their redemption rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::{Money, Rate};
use crate::types::order::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` is centavos off.
    Fixed,
    /// `discount_value` is basis points off.
    Percentage,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Coupon {
    pub id: String,
    /// Upper-cased, unique.
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_purchase_cents: i64,
    /// Cap for percentage coupons.
    pub max_discount_cents: Option<i64>,
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
    #[ts(as = "String")]
    pub valid_from: DateTime<Utc>,
    #[ts(as = "String")]
    pub valid_to: DateTime<Utc>,
    /// When set, only this customer may redeem the coupon.
    pub customer_id: Option<String>,
    pub active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    #[inline]
    pub fn min_purchase(&self) -> Money {
        Money::from_cents(self.min_purchase_cents)
    }

    #[inline]
    pub fn max_discount(&self) -> Option<Money> {
        self.max_discount_cents.map(Money::from_cents)
    }

    /// The percentage as a rate. Meaningless for fixed coupons.
    pub fn rate(&self) -> Rate {
        Rate::from_bps(self.discount_value.clamp(0, u32::MAX as i64) as u32)
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.map_or(false, |limit| self.usage_count >= limit)
    }

    pub fn is_within_window(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_to
    }
}

/// Append-only record of a coupon applied to a settled order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CouponRedemption {
    pub id: String,
    pub coupon_id: String,
    pub customer_id: Option<String>,
    pub channel: Channel,
    pub order_id: String,
    pub discount_cents: i64,
    /// Set when the owning order was cancelled or reopened.
    pub reversed: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}
