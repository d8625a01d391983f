//! # Coupon Repository
//!
//! Coupons and their redemption rows. Usage is only ever moved by the
//! guarded statements below, so `usage_count <= usage_limit` holds under
//! concurrent settlements.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use sorveteria_core::{Channel, Coupon, CouponRedemption, DiscountType, Money};

/// Input for [`CouponRepository::create`].
#[derive(Debug, Clone)]
pub struct NewCoupon {
    /// Already normalized (upper-case).
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    /// Centavos for fixed coupons, basis points for percentage coupons.
    pub discount_value: i64,
    pub min_purchase: Money,
    pub max_discount: Option<Money>,
    pub usage_limit: Option<i64>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

impl CouponRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    /// Inserts a coupon. A taken code is a `UniqueViolation`.
    pub async fn create(&self, new: NewCoupon) -> DbResult<Coupon> {
        let now = Utc::now();
        let coupon = Coupon {
            id: new_id(),
            code: new.code,
            description: new.description,
            discount_type: new.discount_type,
            discount_value: new.discount_value,
            min_purchase_cents: new.min_purchase.cents(),
            max_discount_cents: new.max_discount.map(|m| m.cents()),
            usage_limit: new.usage_limit,
            usage_count: 0,
            valid_from: new.valid_from,
            valid_to: new.valid_to,
            customer_id: new.customer_id,
            active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO coupons (
                id, code, description, discount_type, discount_value, min_purchase_cents,
                max_discount_cents, usage_limit, usage_count, valid_from, valid_to,
                customer_id, active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, 1, ?12, ?13)
            "#,
        )
        .bind(&coupon.id)
        .bind(&coupon.code)
        .bind(&coupon.description)
        .bind(coupon.discount_type)
        .bind(coupon.discount_value)
        .bind(coupon.min_purchase_cents)
        .bind(coupon.max_discount_cents)
        .bind(coupon.usage_limit)
        .bind(coupon.valid_from)
        .bind(coupon.valid_to)
        .bind(&coupon.customer_id)
        .bind(coupon.created_at)
        .bind(coupon.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(coupon_id = %coupon.id, code = %coupon.code, "Coupon created");
        Ok(coupon)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Coupon>> {
        let mut conn = self.pool.acquire().await?;
        Self::find(&mut conn, id).await
    }

    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Coupon>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_code(&mut conn, code).await
    }

    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<bool> {
        let result = sqlx::query("UPDATE coupons SET active = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn redemptions(&self, coupon_id: &str) -> DbResult<Vec<CouponRedemption>> {
        let rows = sqlx::query_as::<_, CouponRedemption>(
            "SELECT * FROM coupon_redemptions WHERE coupon_id = ?1 ORDER BY created_at",
        )
        .bind(coupon_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // =========================================================================
    // Connection-scoped
    // =========================================================================

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(coupon)
    }

    pub async fn find_by_code(conn: &mut SqliteConnection, code: &str) -> DbResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = ?1")
            .bind(code)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(coupon)
    }

    /// Counts one use. False when the limit was reached in the meantime.
    pub async fn increment_usage(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE coupons SET usage_count = usage_count + 1, updated_at = ?1
            WHERE id = ?2 AND (usage_limit IS NULL OR usage_count < usage_limit)
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_redemption(
        conn: &mut SqliteConnection,
        coupon_id: &str,
        customer_id: Option<&str>,
        channel: Channel,
        order_id: &str,
        discount: Money,
    ) -> DbResult<CouponRedemption> {
        let redemption = CouponRedemption {
            id: new_id(),
            coupon_id: coupon_id.to_string(),
            customer_id: customer_id.map(str::to_string),
            channel,
            order_id: order_id.to_string(),
            discount_cents: discount.cents(),
            reversed: false,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO coupon_redemptions (
                id, coupon_id, customer_id, channel, order_id, discount_cents, reversed, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
            "#,
        )
        .bind(&redemption.id)
        .bind(&redemption.coupon_id)
        .bind(&redemption.customer_id)
        .bind(redemption.channel)
        .bind(&redemption.order_id)
        .bind(redemption.discount_cents)
        .bind(redemption.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(redemption)
    }

    /// The live (not reversed) redemption of an order, if any.
    pub async fn active_redemption(
        conn: &mut SqliteConnection,
        channel: Channel,
        order_id: &str,
    ) -> DbResult<Option<CouponRedemption>> {
        let row = sqlx::query_as::<_, CouponRedemption>(
            r#"
            SELECT * FROM coupon_redemptions
            WHERE channel = ?1 AND order_id = ?2 AND reversed = 0
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(channel)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Marks a redemption reversed and gives the use back to the coupon.
    pub async fn release(conn: &mut SqliteConnection, redemption: &CouponRedemption) -> DbResult<()> {
        let result = sqlx::query("UPDATE coupon_redemptions SET reversed = 1 WHERE id = ?1 AND reversed = 0")
            .bind(&redemption.id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 1 {
            sqlx::query(
                r#"
                UPDATE coupons SET usage_count = MAX(usage_count - 1, 0), updated_at = ?1
                WHERE id = ?2
                "#,
            )
            .bind(Utc::now())
            .bind(&redemption.coupon_id)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
