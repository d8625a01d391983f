//! # Report Repository
//!
//! Read-only aggregates over `settled_orders`, their item and payment rows,
//! and the general ledger. All periods are half-open: `from <= t < to`.
//!
//! Ledger rows derived from orders (`CARD_FEE-...`) or sessions
//! (`CASHSESSION-...`) are left out of [`ReportRepository::ledger_by_category`]:
//! the order aggregates already count that money.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::DbResult;
use sorveteria_core::fees::{CARD_FEE_CATEGORY, CARD_FEE_PREFIX, CASH_SESSION_PREFIX};
use sorveteria_core::{Channel, Money, PaymentMethod, TransactionType};

/// Order totals of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ChannelTotals {
    pub channel: Channel,
    pub orders: i64,
    pub subtotal_cents: i64,
    /// Manual discount plus coupon discount.
    pub discount_cents: i64,
    /// Additional fee plus delivery fee.
    pub fee_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MethodTotal {
    pub channel: Channel,
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ProductSales {
    pub product_id: String,
    pub product_name: String,
    /// Units for unit lines. Weight lines count one per line.
    pub quantity: i64,
    pub weight_grams: i64,
    pub revenue_cents: i64,
    pub cost_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CategoryTotal {
    pub transaction_type: TransactionType,
    pub category: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReportRepository { pool }
    }

    pub async fn channel_totals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<ChannelTotals>> {
        let rows = sqlx::query_as::<_, ChannelTotals>(
            r#"
            SELECT channel,
                   COUNT(*)                                                AS orders,
                   COALESCE(SUM(subtotal_cents), 0)                        AS subtotal_cents,
                   COALESCE(SUM(discount_cents + coupon_discount_cents), 0) AS discount_cents,
                   COALESCE(SUM(additional_fee_cents + delivery_fee_cents), 0) AS fee_cents,
                   COALESCE(SUM(total_cents), 0)                           AS total_cents
            FROM settled_orders
            WHERE settled_at >= ?1 AND settled_at < ?2
            GROUP BY channel
            ORDER BY channel
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn method_totals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<MethodTotal>> {
        let rows = sqlx::query_as::<_, MethodTotal>(
            r#"
            SELECT p.channel, p.method, COALESCE(SUM(p.amount_cents), 0) AS amount_cents
            FROM order_payments p
            JOIN settled_orders s ON s.channel = p.channel AND s.order_id = p.order_id
            WHERE s.settled_at >= ?1 AND s.settled_at < ?2
            GROUP BY p.channel, p.method
            ORDER BY p.channel, p.method
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Best sellers by revenue.
    pub async fn top_products(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<ProductSales>> {
        let rows = sqlx::query_as::<_, ProductSales>(
            r#"
            SELECT i.product_id,
                   MAX(i.product_name)                  AS product_name,
                   COALESCE(SUM(i.quantity), 0)         AS quantity,
                   COALESCE(SUM(i.weight_grams), 0)     AS weight_grams,
                   COALESCE(SUM(i.subtotal_cents), 0)   AS revenue_cents,
                   COALESCE(SUM(i.cost_cents), 0)       AS cost_cents
            FROM order_items i
            JOIN settled_orders s ON s.channel = i.channel AND s.order_id = i.order_id
            WHERE s.settled_at >= ?1 AND s.settled_at < ?2
            GROUP BY i.product_id
            ORDER BY revenue_cents DESC, quantity DESC
            LIMIT ?3
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Sum of the item cost snapshots of settled orders.
    pub async fn cost_of_goods(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> DbResult<Money> {
        let cents: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(i.cost_cents), 0)
            FROM order_items i
            JOIN settled_orders s ON s.channel = i.channel AND s.order_id = i.order_id
            WHERE s.settled_at >= ?1 AND s.settled_at < ?2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(Money::from_cents(cents))
    }

    /// Live card-fee expense rows dated in the period.
    pub async fn card_fees(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> DbResult<Money> {
        let cents: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0)
            FROM financial_transactions
            WHERE transaction_type = 'expense'
              AND category = ?1
              AND status <> 'cancelled'
              AND transaction_date >= ?2 AND transaction_date < ?3
            "#,
        )
        .bind(CARD_FEE_CATEGORY)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(Money::from_cents(cents))
    }

    /// Live ledger rows not derived from orders or sessions, per type and category.
    pub async fn ledger_by_category(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<CategoryTotal>> {
        let rows = sqlx::query_as::<_, CategoryTotal>(
            r#"
            SELECT transaction_type, category, COALESCE(SUM(amount_cents), 0) AS amount_cents
            FROM financial_transactions
            WHERE status <> 'cancelled'
              AND transaction_type IN ('revenue', 'expense')
              AND category <> ?1
              AND (reference_number IS NULL
                   OR (substr(reference_number, 1, length(?2)) <> ?2
                       AND substr(reference_number, 1, length(?3)) <> ?3))
              AND transaction_date >= ?4 AND transaction_date < ?5
            GROUP BY transaction_type, category
            ORDER BY transaction_type, category
            "#,
        )
        .bind(CARD_FEE_CATEGORY)
        .bind(CARD_FEE_PREFIX)
        .bind(CASH_SESSION_PREFIX)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::finance::{FinanceRepository, NewFinancialTransaction};
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use sorveteria_core::FinancialStatus;

    fn row(
        transaction_type: TransactionType,
        category: &str,
        cents: i64,
        reference: Option<&str>,
    ) -> NewFinancialTransaction {
        NewFinancialTransaction {
            transaction_type,
            category: category.to_string(),
            description: category.to_string(),
            amount: Money::from_cents(cents),
            status: FinancialStatus::Paid,
            transaction_date: Utc::now(),
            due_date: None,
            paid_at: Some(Utc::now()),
            reference_number: reference.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_ledger_by_category_skips_derived_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        for new in [
            row(TransactionType::Revenue, "sales", 3600, Some("CASHSESSION-abc")),
            row(TransactionType::Expense, "card_fee", 72, Some("CARD_FEE-SALE-s1-credit")),
            row(TransactionType::Expense, "rent", 250_000, Some("PAYABLE-p1")),
            row(TransactionType::Revenue, "catering", 10_000, None),
        ] {
            FinanceRepository::insert_transaction(&mut conn, new).await.unwrap();
        }
        drop(conn);

        let from = Utc::now() - Duration::days(1);
        let to = Utc::now() + Duration::days(1);
        let rows = db.reports().ledger_by_category(from, to).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.category == "rent" && r.amount_cents == 250_000));
        assert!(rows.iter().any(|r| r.category == "catering" && r.amount_cents == 10_000));
        assert_eq!(db.reports().card_fees(from, to).await.unwrap().cents(), 72);
    }

    #[tokio::test]
    async fn test_empty_period() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let from = Utc::now() - Duration::days(1);
        let to = Utc::now();

        assert!(db.reports().channel_totals(from, to).await.unwrap().is_empty());
        assert!(db.reports().top_products(from, to, 10).await.unwrap().is_empty());
        assert!(db.reports().cost_of_goods(from, to).await.unwrap().is_zero());
    }
}
