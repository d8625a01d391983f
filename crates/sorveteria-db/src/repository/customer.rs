//! # Customer Repository
//!
//! Customers and their two append-only reward ledgers.
//!
//! ## Posting
//! ```text
//! post_points / post_cashback (one transaction, caller-owned):
//!
//!   UPDATE customers SET balance = balance + Δ
//!   WHERE id = ? AND balance + Δ >= 0          ← never below zero
//!        │
//!        ├── 0 rows → None (caller raises InsufficientBalance)
//!        ▼
//!   INSERT ledger row { Δ, balance_after, seq = last seq + 1 }
//! ```
//!
//! Every balance change goes through a posting, so the stored balance always
//! equals the sum of the customer's ledger rows.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use sorveteria_core::{CashbackTransaction, Channel, Customer, LoyaltyTransaction, RewardEntryType};

/// Input for [`CustomerRepository::create`].
#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub name: String,
    pub email: Option<String>,
    /// Eleven digits, already normalized.
    pub cpf: Option<String>,
    pub phone: Option<String>,
}

/// One signed movement on a reward balance.
#[derive(Debug, Clone)]
pub struct LedgerPosting {
    pub customer_id: String,
    pub entry_type: RewardEntryType,
    /// Points, or centavos for cashback. Negative for redeem and reversal.
    pub amount: i64,
    pub channel: Option<Channel>,
    pub order_id: Option<String>,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
enum Ledger {
    Loyalty,
    Cashback,
}

impl Ledger {
    const fn balance_column(self) -> &'static str {
        match self {
            Ledger::Loyalty => "loyalty_points",
            Ledger::Cashback => "cashback_balance_cents",
        }
    }

    const fn table(self) -> &'static str {
        match self {
            Ledger::Loyalty => "loyalty_transactions",
            Ledger::Cashback => "cashback_transactions",
        }
    }

    const fn amount_column(self) -> &'static str {
        match self {
            Ledger::Loyalty => "points",
            Ledger::Cashback => "amount_cents",
        }
    }

    const fn balance_after_column(self) -> &'static str {
        match self {
            Ledger::Loyalty => "balance_after",
            Ledger::Cashback => "balance_after_cents",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Inserts a customer. Duplicate email or CPF is a `UniqueViolation`.
    pub async fn create(&self, new: NewCustomer) -> DbResult<Customer> {
        let now = Utc::now();
        let customer = Customer {
            id: new_id(),
            name: new.name,
            email: new.email,
            cpf: new.cpf,
            phone: new.phone,
            loyalty_points: 0,
            cashback_balance_cents: 0,
            active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO customers (
                id, name, email, cpf, phone, loyalty_points, cashback_balance_cents,
                active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 1, ?6, ?7)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.cpf)
        .bind(&customer.phone)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(customer_id = %customer.id, "Customer created");
        Ok(customer)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Customer>> {
        let mut conn = self.pool.acquire().await?;
        Self::find(&mut conn, id).await
    }

    pub async fn find_by_cpf(&self, cpf: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE cpf = ?1")
            .bind(cpf)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    pub async fn list(&self) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>("SELECT * FROM customers ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(customers)
    }

    /// Loyalty ledger, oldest first.
    pub async fn loyalty_ledger(&self, customer_id: &str) -> DbResult<Vec<LoyaltyTransaction>> {
        let rows = sqlx::query_as::<_, LoyaltyTransaction>(
            "SELECT * FROM loyalty_transactions WHERE customer_id = ?1 ORDER BY seq",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Cashback ledger, oldest first.
    pub async fn cashback_ledger(&self, customer_id: &str) -> DbResult<Vec<CashbackTransaction>> {
        let rows = sqlx::query_as::<_, CashbackTransaction>(
            "SELECT * FROM cashback_transactions WHERE customer_id = ?1 ORDER BY seq",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // =========================================================================
    // Connection-scoped
    // =========================================================================

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(customer)
    }

    /// Posts to the loyalty ledger. `None` when the balance would go negative.
    pub async fn post_points(conn: &mut SqliteConnection, posting: &LedgerPosting) -> DbResult<Option<i64>> {
        Self::post(conn, Ledger::Loyalty, posting).await
    }

    /// Posts to the cashback ledger. `None` when the balance would go negative.
    pub async fn post_cashback(conn: &mut SqliteConnection, posting: &LedgerPosting) -> DbResult<Option<i64>> {
        Self::post(conn, Ledger::Cashback, posting).await
    }

    async fn post(
        conn: &mut SqliteConnection,
        ledger: Ledger,
        posting: &LedgerPosting,
    ) -> DbResult<Option<i64>> {
        let now = Utc::now();
        let column = ledger.balance_column();

        let update = format!(
            "UPDATE customers SET {column} = {column} + ?1, updated_at = ?2 WHERE id = ?3 AND {column} + ?1 >= 0"
        );
        let result = sqlx::query(&update)
            .bind(posting.amount)
            .bind(now)
            .bind(&posting.customer_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let select = format!("SELECT {column} FROM customers WHERE id = ?1");
        let balance_after: i64 = sqlx::query_scalar(&select)
            .bind(&posting.customer_id)
            .fetch_one(&mut *conn)
            .await?;

        let insert = format!(
            r#"
            INSERT INTO {table} (
                id, customer_id, entry_type, {amount}, {after}, channel, order_id,
                description, expires_at, created_at, seq
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM {table} WHERE customer_id = ?2)
            )
            "#,
            table = ledger.table(),
            amount = ledger.amount_column(),
            after = ledger.balance_after_column(),
        );
        sqlx::query(&insert)
            .bind(new_id())
            .bind(&posting.customer_id)
            .bind(posting.entry_type)
            .bind(posting.amount)
            .bind(balance_after)
            .bind(posting.channel)
            .bind(&posting.order_id)
            .bind(&posting.description)
            .bind(posting.expires_at)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        debug!(
            customer_id = %posting.customer_id,
            ledger = ledger.table(),
            amount = posting.amount,
            balance_after,
            "Reward ledger posted"
        );
        Ok(Some(balance_after))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn posting(customer_id: &str, entry_type: RewardEntryType, amount: i64) -> LedgerPosting {
        LedgerPosting {
            customer_id: customer_id.to_string(),
            entry_type,
            amount,
            channel: None,
            order_id: None,
            description: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_cpf_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let new = NewCustomer {
            name: "Ana".to_string(),
            cpf: Some("12345678909".to_string()),
            ..Default::default()
        };
        db.customers().create(new.clone()).await.unwrap();
        assert!(db.customers().create(new).await.unwrap_err().is_unique_violation());
    }

    #[tokio::test]
    async fn test_postings_keep_balance_and_snapshots() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customer = db
            .customers()
            .create(NewCustomer {
                name: "Bia".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let id = customer.id.as_str();
        assert_eq!(
            CustomerRepository::post_points(&mut conn, &posting(id, RewardEntryType::Earn, 36)).await.unwrap(),
            Some(36)
        );
        assert_eq!(
            CustomerRepository::post_points(&mut conn, &posting(id, RewardEntryType::Redeem, -10)).await.unwrap(),
            Some(26)
        );
        assert_eq!(
            CustomerRepository::post_points(&mut conn, &posting(id, RewardEntryType::Redeem, -30)).await.unwrap(),
            None
        );
        assert_eq!(
            CustomerRepository::post_cashback(&mut conn, &posting(id, RewardEntryType::Earn, 180)).await.unwrap(),
            Some(180)
        );
        drop(conn);

        let stored = db.customers().get(id).await.unwrap().unwrap();
        assert_eq!(stored.loyalty_points, 26);
        assert_eq!(stored.cashback_balance_cents, 180);

        let ledger = db.customers().loyalty_ledger(id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.iter().map(|r| r.points).sum::<i64>(), 26);
        assert_eq!(ledger[1].balance_after, 26);
        assert_eq!(ledger[1].entry_type, RewardEntryType::Redeem);
    }
}
