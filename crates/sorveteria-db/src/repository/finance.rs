//! # Finance Repository
//!
//! General ledger rows and the payable/receivable obligations they mirror.
//!
//! `reference_number` is indexed but not unique. Derived rows are created
//! check-before-insert inside the caller's transaction, and older data is
//! allowed to hold duplicates the status reconciler reports on.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use sorveteria_core::{
    AccountPayable, AccountReceivable, FinancialStatus, FinancialTransaction, Money, TransactionType,
};

/// Input for [`FinanceRepository::insert_transaction`].
#[derive(Debug, Clone)]
pub struct NewFinancialTransaction {
    pub transaction_type: TransactionType,
    pub category: String,
    pub description: String,
    pub amount: Money,
    pub status: FinancialStatus,
    pub transaction_date: DateTime<Utc>,
    pub due_date: Option<NaiveDate>,
    pub paid_at: Option<DateTime<Utc>>,
    pub reference_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPayable {
    pub supplier: String,
    pub description: String,
    pub category: String,
    pub amount: Money,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct NewReceivable {
    pub customer_id: Option<String>,
    pub debtor: String,
    pub description: String,
    pub category: String,
    pub amount: Money,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct FinanceRepository {
    pool: SqlitePool,
}

impl FinanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        FinanceRepository { pool }
    }

    pub async fn get_transaction(&self, id: &str) -> DbResult<Option<FinancialTransaction>> {
        let row = sqlx::query_as::<_, FinancialTransaction>(
            "SELECT * FROM financial_transactions WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn by_reference(&self, reference: &str) -> DbResult<Vec<FinancialTransaction>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_reference(&mut conn, reference).await
    }

    /// Rows whose competence date falls in `[from, to)`.
    pub async fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<FinancialTransaction>> {
        let rows = sqlx::query_as::<_, FinancialTransaction>(
            r#"
            SELECT * FROM financial_transactions
            WHERE transaction_date >= ?1 AND transaction_date < ?2
            ORDER BY transaction_date, created_at
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_by_category(&self, category: &str) -> DbResult<Vec<FinancialTransaction>> {
        let rows = sqlx::query_as::<_, FinancialTransaction>(
            "SELECT * FROM financial_transactions WHERE category = ?1 ORDER BY transaction_date",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_payable(&self, id: &str) -> DbResult<Option<AccountPayable>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_payable(&mut conn, id).await
    }

    pub async fn get_receivable(&self, id: &str) -> DbResult<Option<AccountReceivable>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_receivable(&mut conn, id).await
    }

    pub async fn list_payables(&self) -> DbResult<Vec<AccountPayable>> {
        let rows = sqlx::query_as::<_, AccountPayable>(
            "SELECT * FROM accounts_payable ORDER BY due_date, created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_receivables(&self) -> DbResult<Vec<AccountReceivable>> {
        let rows = sqlx::query_as::<_, AccountReceivable>(
            "SELECT * FROM accounts_receivable ORDER BY due_date, created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Paid or cancelled payables. Input of the status reconciler.
    pub async fn settled_payables(&self) -> DbResult<Vec<AccountPayable>> {
        let rows = sqlx::query_as::<_, AccountPayable>(
            "SELECT * FROM accounts_payable WHERE status IN ('paid', 'cancelled') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Paid or cancelled receivables. Input of the status reconciler.
    pub async fn settled_receivables(&self) -> DbResult<Vec<AccountReceivable>> {
        let rows = sqlx::query_as::<_, AccountReceivable>(
            "SELECT * FROM accounts_receivable WHERE status IN ('paid', 'cancelled') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // =========================================================================
    // Connection-scoped: ledger
    // =========================================================================

    pub async fn insert_transaction(
        conn: &mut SqliteConnection,
        new: NewFinancialTransaction,
    ) -> DbResult<FinancialTransaction> {
        let now = Utc::now();
        let row = FinancialTransaction {
            id: new_id(),
            transaction_type: new.transaction_type,
            category: new.category,
            description: new.description,
            amount_cents: new.amount.cents(),
            status: new.status,
            transaction_date: new.transaction_date,
            due_date: new.due_date,
            paid_at: new.paid_at,
            reference_number: new.reference_number,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO financial_transactions (
                id, transaction_type, category, description, amount_cents, status,
                transaction_date, due_date, paid_at, reference_number, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&row.id)
        .bind(row.transaction_type)
        .bind(&row.category)
        .bind(&row.description)
        .bind(row.amount_cents)
        .bind(row.status)
        .bind(row.transaction_date)
        .bind(row.due_date)
        .bind(row.paid_at)
        .bind(&row.reference_number)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *conn)
        .await?;

        debug!(
            transaction_id = %row.id,
            reference = ?row.reference_number,
            amount = row.amount_cents,
            "Financial transaction inserted"
        );
        Ok(row)
    }

    /// Every row carrying exactly this key, oldest first.
    pub async fn find_by_reference(
        conn: &mut SqliteConnection,
        reference: &str,
    ) -> DbResult<Vec<FinancialTransaction>> {
        let rows = sqlx::query_as::<_, FinancialTransaction>(
            "SELECT * FROM financial_transactions WHERE reference_number = ?1 ORDER BY created_at",
        )
        .bind(reference)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn update_status(
        conn: &mut SqliteConnection,
        id: &str,
        status: FinancialStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE financial_transactions SET status = ?1, paid_at = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(status)
        .bind(paid_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Moves the live rows of a key from pending to `status`. Returns how many moved.
    pub async fn update_pending_by_reference(
        conn: &mut SqliteConnection,
        reference: &str,
        status: FinancialStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE financial_transactions SET status = ?1, paid_at = ?2, updated_at = ?3
            WHERE reference_number = ?4 AND status IN ('pending', 'overdue')
            "#,
        )
        .bind(status)
        .bind(paid_at)
        .bind(Utc::now())
        .bind(reference)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Connection-scoped: obligations
    // =========================================================================

    pub async fn insert_payable(conn: &mut SqliteConnection, new: NewPayable) -> DbResult<AccountPayable> {
        let now = Utc::now();
        let payable = AccountPayable {
            id: new_id(),
            supplier: new.supplier,
            description: new.description,
            category: new.category,
            amount_cents: new.amount.cents(),
            due_date: new.due_date,
            status: FinancialStatus::Pending,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO accounts_payable (
                id, supplier, description, category, amount_cents, due_date, status,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&payable.id)
        .bind(&payable.supplier)
        .bind(&payable.description)
        .bind(&payable.category)
        .bind(payable.amount_cents)
        .bind(payable.due_date)
        .bind(payable.status)
        .bind(payable.created_at)
        .bind(payable.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(payable)
    }

    pub async fn insert_receivable(
        conn: &mut SqliteConnection,
        new: NewReceivable,
    ) -> DbResult<AccountReceivable> {
        let now = Utc::now();
        let receivable = AccountReceivable {
            id: new_id(),
            customer_id: new.customer_id,
            debtor: new.debtor,
            description: new.description,
            category: new.category,
            amount_cents: new.amount.cents(),
            due_date: new.due_date,
            status: FinancialStatus::Pending,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO accounts_receivable (
                id, customer_id, debtor, description, category, amount_cents, due_date, status,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&receivable.id)
        .bind(&receivable.customer_id)
        .bind(&receivable.debtor)
        .bind(&receivable.description)
        .bind(&receivable.category)
        .bind(receivable.amount_cents)
        .bind(receivable.due_date)
        .bind(receivable.status)
        .bind(receivable.created_at)
        .bind(receivable.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(receivable)
    }

    pub async fn find_payable(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<AccountPayable>> {
        let row = sqlx::query_as::<_, AccountPayable>("SELECT * FROM accounts_payable WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn find_receivable(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<AccountReceivable>> {
        let row = sqlx::query_as::<_, AccountReceivable>("SELECT * FROM accounts_receivable WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Pending/overdue → `status`. False when the payable is already final.
    pub async fn settle_payable(
        conn: &mut SqliteConnection,
        id: &str,
        status: FinancialStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        settle_obligation(conn, "accounts_payable", id, status, paid_at).await
    }

    /// Pending/overdue → `status`. False when the receivable is already final.
    pub async fn settle_receivable(
        conn: &mut SqliteConnection,
        id: &str,
        status: FinancialStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        settle_obligation(conn, "accounts_receivable", id, status, paid_at).await
    }

    /// Flips pending payables due before `today` to overdue. Returns their ids.
    pub async fn mark_payables_overdue(conn: &mut SqliteConnection, today: NaiveDate) -> DbResult<Vec<String>> {
        mark_overdue(conn, "accounts_payable", today).await
    }

    /// Flips pending receivables due before `today` to overdue. Returns their ids.
    pub async fn mark_receivables_overdue(
        conn: &mut SqliteConnection,
        today: NaiveDate,
    ) -> DbResult<Vec<String>> {
        mark_overdue(conn, "accounts_receivable", today).await
    }
}

async fn settle_obligation(
    conn: &mut SqliteConnection,
    table: &str,
    id: &str,
    status: FinancialStatus,
    paid_at: Option<DateTime<Utc>>,
) -> DbResult<bool> {
    let sql = format!(
        "UPDATE {table} SET status = ?1, paid_at = ?2, updated_at = ?3 WHERE id = ?4 AND status IN ('pending', 'overdue')"
    );
    let result = sqlx::query(&sql)
        .bind(status)
        .bind(paid_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

async fn mark_overdue(conn: &mut SqliteConnection, table: &str, today: NaiveDate) -> DbResult<Vec<String>> {
    let select = format!("SELECT id FROM {table} WHERE status = 'pending' AND due_date < ?1 ORDER BY due_date");
    let ids: Vec<String> = sqlx::query_scalar(&select)
        .bind(today)
        .fetch_all(&mut *conn)
        .await?;

    if ids.is_empty() {
        return Ok(ids);
    }

    let update = format!(
        "UPDATE {table} SET status = 'overdue', updated_at = ?1 WHERE status = 'pending' AND due_date < ?2"
    );
    sqlx::query(&update)
        .bind(Utc::now())
        .bind(today)
        .execute(&mut *conn)
        .await?;

    Ok(ids)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn payable(due: NaiveDate) -> NewPayable {
        NewPayable {
            supplier: "Laticínios Serra".to_string(),
            description: "Leite".to_string(),
            category: "supplies".to_string(),
            amount: Money::from_cents(48_000),
            due_date: due,
        }
    }

    #[tokio::test]
    async fn test_reference_lookup_is_exact() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        for reference in ["CARD_FEE-SALE-s1-credit", "CARD_FEE-SALE-s1-debit"] {
            FinanceRepository::insert_transaction(
                &mut conn,
                NewFinancialTransaction {
                    transaction_type: TransactionType::Expense,
                    category: "card_fee".to_string(),
                    description: "Taxa".to_string(),
                    amount: Money::from_cents(72),
                    status: FinancialStatus::Paid,
                    transaction_date: Utc::now(),
                    due_date: None,
                    paid_at: Some(Utc::now()),
                    reference_number: Some(reference.to_string()),
                },
            )
            .await
            .unwrap();
        }

        let rows = FinanceRepository::find_by_reference(&mut conn, "CARD_FEE-SALE-s1-credit")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(FinanceRepository::find_by_reference(&mut conn, "CARD_FEE-SALE-s1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_obligation_settles_once_and_overdue_skips_final() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        let late = FinanceRepository::insert_payable(&mut conn, payable(today.pred_opt().unwrap()))
            .await
            .unwrap();
        let paid = FinanceRepository::insert_payable(&mut conn, payable(today.pred_opt().unwrap()))
            .await
            .unwrap();
        FinanceRepository::insert_payable(&mut conn, payable(today)).await.unwrap();

        assert!(FinanceRepository::settle_payable(&mut conn, &paid.id, FinancialStatus::Paid, Some(Utc::now()))
            .await
            .unwrap());
        assert!(!FinanceRepository::settle_payable(&mut conn, &paid.id, FinancialStatus::Cancelled, None)
            .await
            .unwrap());

        let flipped = FinanceRepository::mark_payables_overdue(&mut conn, today).await.unwrap();
        assert_eq!(flipped, vec![late.id.clone()]);
        drop(conn);

        let stored = db.finance().get_payable(&late.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FinancialStatus::Overdue);
        assert_eq!(db.finance().settled_payables().await.unwrap().len(), 1);
    }
}
