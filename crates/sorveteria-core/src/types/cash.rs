//! Cash drawer records: payment methods, cash sessions and closing breakdowns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash into the drawer.
    Cash,
    Debit,
    Credit,
    /// Instant bank transfer.
    Pix,
    /// Vouchers, meal tickets and anything else.
    Other,
}

impl PaymentMethod {
    /// All methods in drawer order.
    pub const ALL: [PaymentMethod; 5] = [
        PaymentMethod::Cash,
        PaymentMethod::Debit,
        PaymentMethod::Credit,
        PaymentMethod::Pix,
        PaymentMethod::Other,
    ];

    /// Stable lowercase name, as stored and as used in ledger reference keys.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Debit => "debit",
            PaymentMethod::Credit => "credit",
            PaymentMethod::Pix => "pix",
            PaymentMethod::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cash Session
// =============================================================================

/// Lifecycle of a till.
///
/// ```text
/// open ──cashier_close──► cashier_closed ──manager_close──► manager_closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CashSessionStatus {
    Open,
    CashierClosed,
    ManagerClosed,
}

impl CashSessionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CashSessionStatus::Open => "open",
            CashSessionStatus::CashierClosed => "cashier_closed",
            CashSessionStatus::ManagerClosed => "manager_closed",
        }
    }
}

impl fmt::Display for CashSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal's cash-drawer period.
///
/// Running totals are only ever moved by settlement and its reversals
/// (atomic increments) or by an explicit recalculation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashSession {
    pub id: String,
    pub terminal_id: String,
    pub opened_by: String,
    /// Float placed in the drawer at opening. Not part of `total_cash`.
    pub initial_cash_cents: i64,
    pub total_cash_cents: i64,
    pub total_debit_cents: i64,
    pub total_credit_cents: i64,
    pub total_pix_cents: i64,
    pub total_other_cents: i64,
    pub total_sales_cents: i64,
    pub status: CashSessionStatus,
    pub counted_cash_cents: Option<i64>,
    /// `counted_cash - total_cash`, recorded at cashier close.
    pub cashier_difference_cents: Option<i64>,
    pub cashier_closed_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub cashier_closed_at: Option<DateTime<Utc>>,
    pub manager_validated: bool,
    pub manager_closed_by: Option<String>,
    pub manager_notes: Option<String>,
    #[ts(as = "Option<String>")]
    pub manager_closed_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl CashSession {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == CashSessionStatus::Open
    }

    #[inline]
    pub fn total_cash(&self) -> Money {
        Money::from_cents(self.total_cash_cents)
    }

    #[inline]
    pub fn total_sales(&self) -> Money {
        Money::from_cents(self.total_sales_cents)
    }

    /// Running total recorded for a single method.
    pub fn total_for(&self, method: PaymentMethod) -> Money {
        Money::from_cents(match method {
            PaymentMethod::Cash => self.total_cash_cents,
            PaymentMethod::Debit => self.total_debit_cents,
            PaymentMethod::Credit => self.total_credit_cents,
            PaymentMethod::Pix => self.total_pix_cents,
            PaymentMethod::Other => self.total_other_cents,
        })
    }

    /// When the session stopped taking sales, if it has.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.cashier_closed_at.or(self.manager_closed_at)
    }
}

/// Per-method amount declared by the operator at cashier close.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashBreakdownEntry {
    pub id: String,
    pub session_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}
