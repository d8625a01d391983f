//! General ledger and obligations.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Revenue,
    Expense,
    Transfer,
}

/// Status shared by ledger rows and the obligations they mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FinancialStatus {
    Pending,
    Paid,
    Cancelled,
    Overdue,
}

impl FinancialStatus {
    /// Paid and cancelled rows never change again.
    pub const fn is_final(&self) -> bool {
        matches!(self, FinancialStatus::Paid | FinancialStatus::Cancelled)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            FinancialStatus::Pending => "pending",
            FinancialStatus::Paid => "paid",
            FinancialStatus::Cancelled => "cancelled",
            FinancialStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for FinancialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// General ledger row.
///
/// `reference_number` is the idempotency key of derived rows
/// (`CARD_FEE-...`, `CASHSESSION-...`, `PAYABLE-...`, `RECEIVABLE-...`).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct FinancialTransaction {
    pub id: String,
    pub transaction_type: TransactionType,
    /// Free-form accounting category (`sales`, `card_fee`, `rent`...).
    pub category: String,
    pub description: String,
    pub amount_cents: i64,
    pub status: FinancialStatus,
    /// Competence date used by the DRE.
    #[ts(as = "String")]
    pub transaction_date: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub due_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    pub reference_number: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl FinancialTransaction {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AccountPayable {
    pub id: String,
    pub supplier: String,
    pub description: String,
    pub category: String,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub due_date: NaiveDate,
    pub status: FinancialStatus,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AccountReceivable {
    pub id: String,
    pub customer_id: Option<String>,
    pub debtor: String,
    pub description: String,
    pub category: String,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub due_date: NaiveDate,
    pub status: FinancialStatus,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Obligation kind, shared by the status reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Payable,
    Receivable,
}

impl AccountKind {
    /// Ledger row type derived from an obligation of this kind.
    pub const fn transaction_type(&self) -> TransactionType {
        match self {
            AccountKind::Payable => TransactionType::Expense,
            AccountKind::Receivable => TransactionType::Revenue,
        }
    }
}
