//! Order records for the three sales channels.
//!
//! Headers are channel-specific (`Sale`, `Comanda`, `DeliveryOrder`); line
//! items and payments share one shape keyed by `(channel, order_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;
use crate::types::cash::PaymentMethod;
use crate::types::catalog::SaleType;

// =============================================================================
// Channel
// =============================================================================

/// Order-taking channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Walk-in counter sale.
    Sale,
    /// In-store tab.
    Comanda,
    Delivery,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Sale, Channel::Comanda, Channel::Delivery];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Channel::Sale => "sale",
            Channel::Comanda => "comanda",
            Channel::Delivery => "delivery",
        }
    }

    /// Source segment used in ledger reference keys (`CARD_FEE-SALE-...`).
    pub const fn reference_tag(&self) -> &'static str {
        match self {
            Channel::Sale => "SALE",
            Channel::Comanda => "COMANDA",
            Channel::Delivery => "DELIVERY",
        }
    }

    pub fn from_reference_tag(tag: &str) -> Option<Self> {
        Channel::ALL.into_iter().find(|c| c.reference_tag() == tag)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel plus order id: enough to find any order's items and payments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderRef {
    pub channel: Channel,
    pub order_id: String,
}

impl OrderRef {
    pub fn new(channel: Channel, order_id: impl Into<String>) -> Self {
        OrderRef {
            channel,
            order_id: order_id.into(),
        }
    }
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.order_id)
    }
}

// =============================================================================
// Statuses
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Completed,
    Cancelled,
    /// Payments were corrected after settlement.
    Adjusted,
}

impl SaleStatus {
    /// Completed and adjusted sales both count as settled revenue.
    pub const fn is_settled(&self) -> bool {
        matches!(self, SaleStatus::Completed | SaleStatus::Adjusted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ComandaStatus {
    Open,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Received,
    Preparing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// The only forward step from this status, if any.
    pub const fn next(&self) -> Option<DeliveryStatus> {
        match self {
            DeliveryStatus::Received => Some(DeliveryStatus::Preparing),
            DeliveryStatus::Preparing => Some(DeliveryStatus::OutForDelivery),
            DeliveryStatus::OutForDelivery => Some(DeliveryStatus::Delivered),
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Received => "received",
            DeliveryStatus::Preparing => "preparing",
            DeliveryStatus::OutForDelivery => "out_for_delivery",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

// =============================================================================
// Order Headers
// =============================================================================

/// A walk-in counter sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub order_number: String,
    pub cash_session_id: String,
    pub customer_id: Option<String>,
    pub coupon_id: Option<String>,
    pub status: SaleStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub coupon_discount_cents: i64,
    pub additional_fee_cents: i64,
    pub total_cents: i64,
    pub points_earned: i64,
    pub cashback_earned_cents: i64,
    pub created_by: String,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// An in-store tab. Items accumulate while `open`; closing settles them.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Comanda {
    pub id: String,
    pub order_number: String,
    pub cash_session_id: String,
    /// Table or tab label ("Mesa 4").
    pub table_label: String,
    pub customer_id: Option<String>,
    pub coupon_id: Option<String>,
    pub status: ComandaStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub coupon_discount_cents: i64,
    /// Service charge.
    pub additional_fee_cents: i64,
    pub total_cents: i64,
    pub points_earned: i64,
    pub cashback_earned_cents: i64,
    pub opened_by: String,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Comanda {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == ComandaStatus::Open
    }
}

/// A delivery order. Settled at creation, then walked to `delivered`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DeliveryOrder {
    pub id: String,
    pub order_number: String,
    pub cash_session_id: String,
    pub customer_id: Option<String>,
    pub coupon_id: Option<String>,
    pub status: DeliveryStatus,
    pub recipient_name: String,
    pub phone: Option<String>,
    pub address: String,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub coupon_discount_cents: i64,
    pub additional_fee_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    pub points_earned: i64,
    pub cashback_earned_cents: i64,
    pub created_by: String,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Items and Payments
// =============================================================================

/// A priced line with a point-in-time snapshot of the product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub channel: Channel,
    pub order_id: String,
    pub product_id: String,
    /// Product name at time of sale (frozen).
    pub product_name: String,
    pub sale_type: SaleType,
    pub size_id: Option<String>,
    pub size_name: Option<String>,
    pub flavor_count: Option<i64>,
    /// Units. Always 1 for weight lines.
    pub quantity: i64,
    pub weight_grams: Option<i64>,
    /// Unit price at time of sale. Per kilogram for weight lines.
    pub unit_price_cents: i64,
    /// Cost of the whole line at time of sale.
    pub cost_cents: i64,
    pub subtotal_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }

    /// Amount that leaves (or returns to) stock: units, or grams for weight lines.
    pub fn stock_quantity(&self) -> i64 {
        match self.sale_type {
            SaleType::Weight => self.weight_grams.unwrap_or(0),
            SaleType::Unit => self.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderPayment {
    pub id: String,
    pub channel: Channel,
    pub order_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl OrderPayment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_walk() {
        let mut status = DeliveryStatus::Received;
        let mut steps = 0;
        while let Some(next) = status.next() {
            status = next;
            steps += 1;
        }
        assert_eq!(status, DeliveryStatus::Delivered);
        assert_eq!(steps, 3);
        assert!(DeliveryStatus::Cancelled.next().is_none());
    }

    #[test]
    fn test_channel_reference_tags() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_reference_tag(channel.reference_tag()), Some(channel));
        }
        assert_eq!(Channel::from_reference_tag("sale"), None);
    }

    #[test]
    fn test_sale_settled_statuses() {
        assert!(SaleStatus::Completed.is_settled());
        assert!(SaleStatus::Adjusted.is_settled());
        assert!(!SaleStatus::Cancelled.is_settled());
    }
}
