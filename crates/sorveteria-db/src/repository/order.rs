//! # Order Repository
//!
//! Headers of the three order channels plus the shared item and payment rows.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sales              comandas             delivery_orders                │
//! │     │                   │                      │                        │
//! │     └───────────┬───────┴──────────────────────┘                        │
//! │                 │  (channel, order_id)                                  │
//! │        ┌────────┴────────┐                                              │
//! │   order_items       order_payments                                      │
//! │                                                                         │
//! │  settled_orders (view): the orders whose money effects are live        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Status changes are guarded by their source status in the WHERE clause;
//! a `false` return means the order was not in that status.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use sorveteria_core::{
    Channel, Comanda, DeliveryOrder, DeliveryStatus, Money, OrderItem, OrderPayment, Sale,
};

/// One row of the `settled_orders` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SettledOrder {
    pub channel: Channel,
    pub order_id: String,
    pub order_number: String,
    pub cash_session_id: String,
    pub customer_id: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub coupon_discount_cents: i64,
    pub additional_fee_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    pub settled_at: DateTime<Utc>,
}

impl SettledOrder {
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // =========================================================================
    // Pool reads
    // =========================================================================

    pub async fn get_sale(&self, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_sale(&mut conn, id).await
    }

    pub async fn get_comanda(&self, id: &str) -> DbResult<Option<Comanda>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_comanda(&mut conn, id).await
    }

    pub async fn get_delivery(&self, id: &str) -> DbResult<Option<DeliveryOrder>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_delivery(&mut conn, id).await
    }

    pub async fn items(&self, channel: Channel, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let mut conn = self.pool.acquire().await?;
        Self::items_for(&mut conn, channel, order_id).await
    }

    pub async fn payments(&self, channel: Channel, order_id: &str) -> DbResult<Vec<OrderPayment>> {
        let mut conn = self.pool.acquire().await?;
        Self::payments_for(&mut conn, channel, order_id).await
    }

    pub async fn list_open_comandas(&self, session_id: &str) -> DbResult<Vec<Comanda>> {
        let comandas = sqlx::query_as::<_, Comanda>(
            "SELECT * FROM comandas WHERE cash_session_id = ?1 AND status = 'open' ORDER BY opened_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comandas)
    }

    pub async fn get_settled(&self, channel: Channel, order_id: &str) -> DbResult<Option<SettledOrder>> {
        let order = sqlx::query_as::<_, SettledOrder>(
            "SELECT * FROM settled_orders WHERE channel = ?1 AND order_id = ?2",
        )
        .bind(channel)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    /// Settled orders with `from <= settled_at < to`, oldest first.
    pub async fn settled_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<SettledOrder>> {
        let orders = sqlx::query_as::<_, SettledOrder>(
            r#"
            SELECT * FROM settled_orders
            WHERE settled_at >= ?1 AND settled_at < ?2
            ORDER BY settled_at, order_number
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    // =========================================================================
    // Connection-scoped: headers
    // =========================================================================

    pub async fn find_sale(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(sale)
    }

    pub async fn find_comanda(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Comanda>> {
        let comanda = sqlx::query_as::<_, Comanda>("SELECT * FROM comandas WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(comanda)
    }

    pub async fn find_delivery(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<DeliveryOrder>> {
        let order = sqlx::query_as::<_, DeliveryOrder>("SELECT * FROM delivery_orders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(order)
    }

    /// Next free sequence for an order-number prefix, across all channels.
    pub async fn next_sequence(conn: &mut SqliteConnection, prefix: &str) -> DbResult<i64> {
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(CAST(substr(order_number, length(?1) + 1) AS INTEGER)) FROM (
                SELECT order_number FROM sales WHERE order_number LIKE ?1 || '%'
                UNION ALL
                SELECT order_number FROM comandas WHERE order_number LIKE ?1 || '%'
                UNION ALL
                SELECT order_number FROM delivery_orders WHERE order_number LIKE ?1 || '%'
            )
            "#,
        )
        .bind(prefix)
        .fetch_one(&mut *conn)
        .await?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub async fn insert_sale(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sales (
                id, order_number, cash_session_id, customer_id, coupon_id, status,
                subtotal_cents, discount_cents, coupon_discount_cents, additional_fee_cents,
                total_cents, points_earned, cashback_earned_cents, created_by, notes,
                cancel_reason, created_at, updated_at, cancelled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.order_number)
        .bind(&sale.cash_session_id)
        .bind(&sale.customer_id)
        .bind(&sale.coupon_id)
        .bind(sale.status)
        .bind(sale.subtotal_cents)
        .bind(sale.discount_cents)
        .bind(sale.coupon_discount_cents)
        .bind(sale.additional_fee_cents)
        .bind(sale.total_cents)
        .bind(sale.points_earned)
        .bind(sale.cashback_earned_cents)
        .bind(&sale.created_by)
        .bind(&sale.notes)
        .bind(&sale.cancel_reason)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.cancelled_at)
        .execute(&mut *conn)
        .await?;

        debug!(sale_id = %sale.id, number = %sale.order_number, "Sale inserted");
        Ok(())
    }

    pub async fn insert_comanda(conn: &mut SqliteConnection, comanda: &Comanda) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO comandas (
                id, order_number, cash_session_id, table_label, customer_id, coupon_id, status,
                subtotal_cents, discount_cents, coupon_discount_cents, additional_fee_cents,
                total_cents, points_earned, cashback_earned_cents, opened_by, notes,
                cancel_reason, opened_at, closed_at, cancelled_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            "#,
        )
        .bind(&comanda.id)
        .bind(&comanda.order_number)
        .bind(&comanda.cash_session_id)
        .bind(&comanda.table_label)
        .bind(&comanda.customer_id)
        .bind(&comanda.coupon_id)
        .bind(comanda.status)
        .bind(comanda.subtotal_cents)
        .bind(comanda.discount_cents)
        .bind(comanda.coupon_discount_cents)
        .bind(comanda.additional_fee_cents)
        .bind(comanda.total_cents)
        .bind(comanda.points_earned)
        .bind(comanda.cashback_earned_cents)
        .bind(&comanda.opened_by)
        .bind(&comanda.notes)
        .bind(&comanda.cancel_reason)
        .bind(comanda.opened_at)
        .bind(comanda.closed_at)
        .bind(comanda.cancelled_at)
        .bind(comanda.updated_at)
        .execute(&mut *conn)
        .await?;

        debug!(comanda_id = %comanda.id, table = %comanda.table_label, "Comanda inserted");
        Ok(())
    }

    pub async fn insert_delivery(conn: &mut SqliteConnection, order: &DeliveryOrder) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_orders (
                id, order_number, cash_session_id, customer_id, coupon_id, status,
                recipient_name, phone, address, subtotal_cents, discount_cents,
                coupon_discount_cents, additional_fee_cents, delivery_fee_cents, total_cents,
                points_earned, cashback_earned_cents, created_by, notes, cancel_reason,
                created_at, updated_at, delivered_at, cancelled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.cash_session_id)
        .bind(&order.customer_id)
        .bind(&order.coupon_id)
        .bind(order.status)
        .bind(&order.recipient_name)
        .bind(&order.phone)
        .bind(&order.address)
        .bind(order.subtotal_cents)
        .bind(order.discount_cents)
        .bind(order.coupon_discount_cents)
        .bind(order.additional_fee_cents)
        .bind(order.delivery_fee_cents)
        .bind(order.total_cents)
        .bind(order.points_earned)
        .bind(order.cashback_earned_cents)
        .bind(&order.created_by)
        .bind(&order.notes)
        .bind(&order.cancel_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.delivered_at)
        .bind(order.cancelled_at)
        .execute(&mut *conn)
        .await?;

        debug!(delivery_id = %order.id, number = %order.order_number, "Delivery order inserted");
        Ok(())
    }

    /// `completed | adjusted → cancelled`.
    pub async fn mark_sale_cancelled(
        conn: &mut SqliteConnection,
        id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET status = 'cancelled', cancel_reason = ?1, cancelled_at = ?2, updated_at = ?2
            WHERE id = ?3 AND status IN ('completed', 'adjusted')
            "#,
        )
        .bind(reason)
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `completed → adjusted`.
    pub async fn mark_sale_adjusted(
        conn: &mut SqliteConnection,
        id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE sales SET status = 'adjusted', updated_at = ?1 WHERE id = ?2 AND status = 'completed'",
        )
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Stores the settlement figures of a comanda and closes it. Guarded on `open`.
    pub async fn save_comanda_close(conn: &mut SqliteConnection, comanda: &Comanda) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE comandas SET
                status = 'closed',
                customer_id = ?1,
                coupon_id = ?2,
                subtotal_cents = ?3,
                discount_cents = ?4,
                coupon_discount_cents = ?5,
                additional_fee_cents = ?6,
                total_cents = ?7,
                points_earned = ?8,
                cashback_earned_cents = ?9,
                notes = ?10,
                closed_at = ?11,
                updated_at = ?11
            WHERE id = ?12 AND status = 'open'
            "#,
        )
        .bind(&comanda.customer_id)
        .bind(&comanda.coupon_id)
        .bind(comanda.subtotal_cents)
        .bind(comanda.discount_cents)
        .bind(comanda.coupon_discount_cents)
        .bind(comanda.additional_fee_cents)
        .bind(comanda.total_cents)
        .bind(comanda.points_earned)
        .bind(comanda.cashback_earned_cents)
        .bind(&comanda.notes)
        .bind(comanda.closed_at)
        .bind(&comanda.id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `closed → open`, clearing the settlement figures. Items stay.
    pub async fn mark_comanda_reopened(
        conn: &mut SqliteConnection,
        id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE comandas SET
                status = 'open',
                coupon_id = NULL,
                discount_cents = 0,
                coupon_discount_cents = 0,
                additional_fee_cents = 0,
                total_cents = subtotal_cents,
                points_earned = 0,
                cashback_earned_cents = 0,
                closed_at = NULL,
                updated_at = ?1
            WHERE id = ?2 AND status = 'closed'
            "#,
        )
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `open → cancelled`.
    pub async fn mark_comanda_cancelled(
        conn: &mut SqliteConnection,
        id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE comandas SET status = 'cancelled', cancel_reason = ?1, cancelled_at = ?2, updated_at = ?2
            WHERE id = ?3 AND status = 'open'
            "#,
        )
        .bind(reason)
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Re-derives an open comanda's running subtotal from its items.
    pub async fn refresh_comanda_subtotal(conn: &mut SqliteConnection, id: &str) -> DbResult<Money> {
        let subtotal: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(subtotal_cents), 0) FROM order_items WHERE channel = 'comanda' AND order_id = ?1",
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE comandas SET subtotal_cents = ?1, total_cents = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(subtotal)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(Money::from_cents(subtotal))
    }

    /// Moves a delivery one step. Guarded on the expected current status.
    pub async fn advance_delivery(
        conn: &mut SqliteConnection,
        id: &str,
        from: DeliveryStatus,
        to: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let delivered_at = (to == DeliveryStatus::Delivered).then_some(at);
        let result = sqlx::query(
            r#"
            UPDATE delivery_orders SET status = ?1, delivered_at = COALESCE(?2, delivered_at), updated_at = ?3
            WHERE id = ?4 AND status = ?5
            "#,
        )
        .bind(to)
        .bind(delivered_at)
        .bind(at)
        .bind(id)
        .bind(from)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Any non-terminal status `→ cancelled`.
    pub async fn mark_delivery_cancelled(
        conn: &mut SqliteConnection,
        id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_orders SET status = 'cancelled', cancel_reason = ?1, cancelled_at = ?2, updated_at = ?2
            WHERE id = ?3 AND status NOT IN ('delivered', 'cancelled')
            "#,
        )
        .bind(reason)
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Connection-scoped: items and payments
    // =========================================================================

    pub async fn insert_items(conn: &mut SqliteConnection, items: &[OrderItem]) -> DbResult<()> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, channel, order_id, product_id, product_name, sale_type, size_id,
                    size_name, flavor_count, quantity, weight_grams, unit_price_cents,
                    cost_cents, subtotal_cents, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
            )
            .bind(&item.id)
            .bind(item.channel)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(&item.product_name)
            .bind(item.sale_type)
            .bind(&item.size_id)
            .bind(&item.size_name)
            .bind(item.flavor_count)
            .bind(item.quantity)
            .bind(item.weight_grams)
            .bind(item.unit_price_cents)
            .bind(item.cost_cents)
            .bind(item.subtotal_cents)
            .bind(item.created_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn items_for(
        conn: &mut SqliteConnection,
        channel: Channel,
        order_id: &str,
    ) -> DbResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE channel = ?1 AND order_id = ?2 ORDER BY created_at, id",
        )
        .bind(channel)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(items)
    }

    /// Removes one item of an order. False when it does not belong to that order.
    pub async fn delete_item(
        conn: &mut SqliteConnection,
        channel: Channel,
        order_id: &str,
        item_id: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM order_items WHERE id = ?1 AND channel = ?2 AND order_id = ?3")
            .bind(item_id)
            .bind(channel)
            .bind(order_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_payments(conn: &mut SqliteConnection, payments: &[OrderPayment]) -> DbResult<()> {
        for payment in payments {
            sqlx::query(
                r#"
                INSERT INTO order_payments (id, channel, order_id, method, amount_cents, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&payment.id)
            .bind(payment.channel)
            .bind(&payment.order_id)
            .bind(payment.method)
            .bind(payment.amount_cents)
            .bind(payment.created_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn payments_for(
        conn: &mut SqliteConnection,
        channel: Channel,
        order_id: &str,
    ) -> DbResult<Vec<OrderPayment>> {
        let payments = sqlx::query_as::<_, OrderPayment>(
            "SELECT * FROM order_payments WHERE channel = ?1 AND order_id = ?2 ORDER BY created_at, id",
        )
        .bind(channel)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(payments)
    }

    pub async fn delete_payments(conn: &mut SqliteConnection, channel: Channel, order_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM order_payments WHERE channel = ?1 AND order_id = ?2")
            .bind(channel)
            .bind(order_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Settled orders of a session.
    pub async fn settled_for_session(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> DbResult<Vec<SettledOrder>> {
        let orders = sqlx::query_as::<_, SettledOrder>(
            "SELECT * FROM settled_orders WHERE cash_session_id = ?1 ORDER BY settled_at",
        )
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(orders)
    }

    /// Payment rows of every settled order of a session.
    pub async fn settled_payments_for_session(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> DbResult<Vec<OrderPayment>> {
        let payments = sqlx::query_as::<_, OrderPayment>(
            r#"
            SELECT p.* FROM order_payments p
            JOIN settled_orders s ON s.channel = p.channel AND s.order_id = p.order_id
            WHERE s.cash_session_id = ?1
            ORDER BY p.created_at, p.id
            "#,
        )
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(payments)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use sorveteria_core::{PaymentMethod, SaleStatus};

    async fn db_with_session() -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = db.cash_sessions().insert_open("T1", "ana", Money::zero()).await.unwrap();
        (db, session.id)
    }

    fn sale(id: &str, number: &str, session_id: &str, total: i64) -> Sale {
        let now = Utc::now();
        Sale {
            id: id.to_string(),
            order_number: number.to_string(),
            cash_session_id: session_id.to_string(),
            customer_id: None,
            coupon_id: None,
            status: SaleStatus::Completed,
            subtotal_cents: total,
            discount_cents: 0,
            coupon_discount_cents: 0,
            additional_fee_cents: 0,
            total_cents: total,
            points_earned: 0,
            cashback_earned_cents: 0,
            created_by: "ana".to_string(),
            notes: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        }
    }

    #[tokio::test]
    async fn test_sequence_spans_channels() {
        let (db, session_id) = db_with_session().await;
        let mut conn = db.pool().acquire().await.unwrap();

        assert_eq!(OrderRepository::next_sequence(&mut conn, "20260131-T1-").await.unwrap(), 1);
        OrderRepository::insert_sale(&mut conn, &sale("s1", "20260131-T1-0001", &session_id, 100))
            .await
            .unwrap();
        OrderRepository::insert_sale(&mut conn, &sale("s2", "20260131-T1-0002", &session_id, 100))
            .await
            .unwrap();
        assert_eq!(OrderRepository::next_sequence(&mut conn, "20260131-T1-").await.unwrap(), 3);
        assert_eq!(OrderRepository::next_sequence(&mut conn, "20260131-T2-").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_sale_leaves_settled_view() {
        let (db, session_id) = db_with_session().await;
        let mut conn = db.pool().acquire().await.unwrap();

        OrderRepository::insert_sale(&mut conn, &sale("s1", "20260131-T1-0001", &session_id, 3600))
            .await
            .unwrap();
        OrderRepository::insert_payments(
            &mut conn,
            &[OrderPayment {
                id: "p1".to_string(),
                channel: Channel::Sale,
                order_id: "s1".to_string(),
                method: PaymentMethod::Cash,
                amount_cents: 3600,
                created_at: Utc::now(),
            }],
        )
        .await
        .unwrap();

        let settled = OrderRepository::settled_for_session(&mut conn, &session_id).await.unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].channel, Channel::Sale);
        assert_eq!(settled[0].total_cents, 3600);
        assert_eq!(
            OrderRepository::settled_payments_for_session(&mut conn, &session_id)
                .await
                .unwrap()
                .len(),
            1
        );

        assert!(OrderRepository::mark_sale_cancelled(&mut conn, "s1", "erro", Utc::now()).await.unwrap());
        assert!(!OrderRepository::mark_sale_cancelled(&mut conn, "s1", "erro", Utc::now()).await.unwrap());
        assert!(OrderRepository::settled_for_session(&mut conn, &session_id).await.unwrap().is_empty());
    }
}
