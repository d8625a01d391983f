//! # Accounts Payable / Receivable
//!
//! Obligations with a due date. Each one is mirrored by a ledger row keyed
//! `PAYABLE-{id}` / `RECEIVABLE-{id}`, created in the same transaction and
//! moved together with it on pay, cancel and overdue.
//!
//! ```text
//! pending ──pay──► paid
//!    │   ╲
//!    │    ╲──cancel──► cancelled
//!    ▼
//! overdue ──pay / cancel──► paid / cancelled
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::rewards;
use sorveteria_core::fees;
use sorveteria_core::validation::{validate_positive_cents, validate_text};
use sorveteria_core::{AccountKind, AccountPayable, AccountReceivable, CoreError, FinancialStatus, Money};
use sorveteria_db::{Database, FinanceRepository, NewFinancialTransaction, NewPayable, NewReceivable};

/// Input of [`AccountsService::create_payable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayableDraft {
    pub supplier: String,
    pub description: String,
    pub category: String,
    pub amount_cents: i64,
    pub due_date: NaiveDate,
}

/// Input of [`AccountsService::create_receivable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivableDraft {
    pub customer_id: Option<String>,
    pub debtor: String,
    pub description: String,
    pub category: String,
    pub amount_cents: i64,
    pub due_date: NaiveDate,
}

/// Ids flipped to overdue by one [`AccountsService::mark_overdue`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverdueReport {
    pub payables: Vec<String>,
    pub receivables: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AccountsService {
    db: Database,
}

impl AccountsService {
    pub fn new(db: Database) -> Self {
        AccountsService { db }
    }

    pub async fn create_payable(&self, draft: PayableDraft) -> EngineResult<AccountPayable> {
        let supplier = validate_text("supplier", &draft.supplier, 100)?;
        let description = validate_text("description", &draft.description, 200)?;
        let category = validate_text("category", &draft.category, 50)?;
        validate_positive_cents("amount", draft.amount_cents)?;
        let amount = Money::from_cents(draft.amount_cents);

        let mut tx = self.db.begin().await?;
        let payable = FinanceRepository::insert_payable(
            &mut tx,
            NewPayable {
                supplier,
                description,
                category,
                amount,
                due_date: draft.due_date,
            },
        )
        .await?;
        insert_mirror(
            &mut tx,
            AccountKind::Payable,
            &payable.id,
            &payable.category,
            format!("{} - {}", payable.supplier, payable.description),
            amount,
            payable.due_date,
        )
        .await?;
        tx.commit().await?;

        info!(payable_id = %payable.id, amount = %amount, due = %payable.due_date, "Payable created");
        Ok(payable)
    }

    pub async fn create_receivable(&self, draft: ReceivableDraft) -> EngineResult<AccountReceivable> {
        let debtor = validate_text("debtor", &draft.debtor, 100)?;
        let description = validate_text("description", &draft.description, 200)?;
        let category = validate_text("category", &draft.category, 50)?;
        validate_positive_cents("amount", draft.amount_cents)?;
        let amount = Money::from_cents(draft.amount_cents);

        let mut tx = self.db.begin().await?;
        if let Some(customer_id) = draft.customer_id.as_deref() {
            rewards::find_customer(&mut tx, customer_id).await?;
        }
        let receivable = FinanceRepository::insert_receivable(
            &mut tx,
            NewReceivable {
                customer_id: draft.customer_id,
                debtor,
                description,
                category,
                amount,
                due_date: draft.due_date,
            },
        )
        .await?;
        insert_mirror(
            &mut tx,
            AccountKind::Receivable,
            &receivable.id,
            &receivable.category,
            format!("{} - {}", receivable.debtor, receivable.description),
            amount,
            receivable.due_date,
        )
        .await?;
        tx.commit().await?;

        info!(receivable_id = %receivable.id, amount = %amount, due = %receivable.due_date, "Receivable created");
        Ok(receivable)
    }

    /// Pending or overdue → paid. `paid_at` defaults to now.
    pub async fn pay_payable(&self, id: &str, paid_at: Option<DateTime<Utc>>) -> EngineResult<AccountPayable> {
        let paid_at = paid_at.unwrap_or_else(Utc::now);
        self.settle(AccountKind::Payable, id, FinancialStatus::Paid, Some(paid_at)).await?;
        self.payable(id).await
    }

    pub async fn cancel_payable(&self, id: &str) -> EngineResult<AccountPayable> {
        self.settle(AccountKind::Payable, id, FinancialStatus::Cancelled, None).await?;
        self.payable(id).await
    }

    /// Pending or overdue → paid. `paid_at` defaults to now.
    pub async fn pay_receivable(&self, id: &str, paid_at: Option<DateTime<Utc>>) -> EngineResult<AccountReceivable> {
        let paid_at = paid_at.unwrap_or_else(Utc::now);
        self.settle(AccountKind::Receivable, id, FinancialStatus::Paid, Some(paid_at)).await?;
        self.receivable(id).await
    }

    pub async fn cancel_receivable(&self, id: &str) -> EngineResult<AccountReceivable> {
        self.settle(AccountKind::Receivable, id, FinancialStatus::Cancelled, None).await?;
        self.receivable(id).await
    }

    /// Flips pending obligations due before `today`, and their ledger rows, to overdue.
    pub async fn mark_overdue(&self, today: NaiveDate) -> EngineResult<OverdueReport> {
        let mut tx = self.db.begin().await?;
        let payables = FinanceRepository::mark_payables_overdue(&mut tx, today).await?;
        let receivables = FinanceRepository::mark_receivables_overdue(&mut tx, today).await?;

        for id in &payables {
            mirror_status(&mut tx, AccountKind::Payable, id, FinancialStatus::Overdue, None).await?;
        }
        for id in &receivables {
            mirror_status(&mut tx, AccountKind::Receivable, id, FinancialStatus::Overdue, None).await?;
        }
        tx.commit().await?;

        info!(
            today = %today,
            payables = payables.len(),
            receivables = receivables.len(),
            "Overdue obligations marked"
        );
        Ok(OverdueReport { payables, receivables })
    }

    async fn settle(
        &self,
        kind: AccountKind,
        id: &str,
        status: FinancialStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let entity = entity_name(kind);
        let mut tx = self.db.begin().await?;

        let current = match kind {
            AccountKind::Payable => FinanceRepository::find_payable(&mut tx, id).await?.map(|p| p.status),
            AccountKind::Receivable => FinanceRepository::find_receivable(&mut tx, id).await?.map(|r| r.status),
        }
        .ok_or_else(|| CoreError::not_found(entity, id))?;
        if current.is_final() {
            return Err(CoreError::invalid_state(entity, id, format!("already {}", current)).into());
        }

        let moved = match kind {
            AccountKind::Payable => FinanceRepository::settle_payable(&mut tx, id, status, paid_at).await?,
            AccountKind::Receivable => FinanceRepository::settle_receivable(&mut tx, id, status, paid_at).await?,
        };
        if !moved {
            return Err(CoreError::invalid_state(entity, id, "changed concurrently").into());
        }

        mirror_status(&mut tx, kind, id, status, paid_at).await?;
        tx.commit().await?;

        info!(account = entity, id = %id, status = %status, "Obligation settled");
        Ok(())
    }

    async fn payable(&self, id: &str) -> EngineResult<AccountPayable> {
        Ok(self
            .db
            .finance()
            .get_payable(id)
            .await?
            .ok_or_else(|| CoreError::not_found("AccountPayable", id))?)
    }

    async fn receivable(&self, id: &str) -> EngineResult<AccountReceivable> {
        Ok(self
            .db
            .finance()
            .get_receivable(id)
            .await?
            .ok_or_else(|| CoreError::not_found("AccountReceivable", id))?)
    }
}

fn entity_name(kind: AccountKind) -> &'static str {
    match kind {
        AccountKind::Payable => "AccountPayable",
        AccountKind::Receivable => "AccountReceivable",
    }
}

async fn insert_mirror(
    conn: &mut SqliteConnection,
    kind: AccountKind,
    id: &str,
    category: &str,
    description: String,
    amount: Money,
    due_date: NaiveDate,
) -> EngineResult<()> {
    let transaction_date = due_date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()).unwrap_or_else(Utc::now);
    FinanceRepository::insert_transaction(
        conn,
        NewFinancialTransaction {
            transaction_type: kind.transaction_type(),
            category: category.to_string(),
            description,
            amount,
            status: FinancialStatus::Pending,
            transaction_date,
            due_date: Some(due_date),
            paid_at: None,
            reference_number: Some(fees::account_reference(kind, id)),
        },
    )
    .await?;
    Ok(())
}

/// Moves the live ledger row of an obligation. Falls back to the legacy key.
async fn mirror_status(
    conn: &mut SqliteConnection,
    kind: AccountKind,
    id: &str,
    status: FinancialStatus,
    paid_at: Option<DateTime<Utc>>,
) -> EngineResult<()> {
    let reference = fees::account_reference(kind, id);
    let mut moved = FinanceRepository::update_pending_by_reference(conn, &reference, status, paid_at).await?;
    if moved == 0 {
        let legacy = fees::legacy_account_reference(kind, id);
        moved = FinanceRepository::update_pending_by_reference(conn, &legacy, status, paid_at).await?;
    }
    if moved == 0 {
        warn!(reference = %reference, status = %status, "No pending ledger row to move, status sync will report it");
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
