//! Customers and their reward ledgers.
//!
//! ## Balance Invariant
//! ```text
//! Customer.loyalty_points        == Σ LoyaltyTransaction.points
//! Customer.cashback_balance      == Σ CashbackTransaction.amount
//!
//! Every balance mutation appends exactly one ledger row carrying the
//! resulting balance in `balance_after`.
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::order::Channel;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// Brazilian taxpayer id, digits only.
    pub cpf: Option<String>,
    pub phone: Option<String>,
    pub loyalty_points: i64,
    pub cashback_balance_cents: i64,
    pub active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    #[inline]
    pub fn cashback_balance(&self) -> Money {
        Money::from_cents(self.cashback_balance_cents)
    }
}

/// Kind of reward ledger movement. The sign lives on the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RewardEntryType {
    /// Accrued on a settlement (positive).
    Earn,
    /// Spent by the customer (negative).
    Redeem,
    /// Undo of an earn when its order is cancelled or reopened (negative).
    Reversal,
    /// Manual correction by staff (either sign).
    Adjustment,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LoyaltyTransaction {
    pub id: String,
    pub customer_id: String,
    pub entry_type: RewardEntryType,
    /// Signed points.
    pub points: i64,
    pub balance_after: i64,
    pub channel: Option<Channel>,
    pub order_id: Option<String>,
    pub description: Option<String>,
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashbackTransaction {
    pub id: String,
    pub customer_id: String,
    pub entry_type: RewardEntryType,
    /// Signed centavos.
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub channel: Option<Channel>,
    pub order_id: Option<String>,
    pub description: Option<String>,
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}
