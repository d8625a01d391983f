//! # Business Configuration Repository
//!
//! The loyalty and cashback singletons and the per-method fee table.
//!
//! Missing rows fall back to the core defaults: loyalty and cashback
//! inactive, every payment method free of fees.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use tracing::info;

use crate::error::DbResult;
use sorveteria_core::{
    CashbackConfig, EligibilityPolicy, LoyaltyConfig, Money, PaymentMethod, PaymentMethodConfig,
    ProductEligibility, Rate,
};

#[derive(sqlx::FromRow)]
struct LoyaltyRow {
    active: bool,
    points_per_real_bps: i64,
    min_purchase_cents: i64,
    applies_to_all_products: bool,
    policy: EligibilityPolicy,
    expiration_days: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct CashbackRow {
    active: bool,
    percentage_bps: i64,
    min_purchase_cents: i64,
    max_cashback_per_purchase_cents: Option<i64>,
    applies_to_all_products: bool,
    policy: EligibilityPolicy,
    expiration_days: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct PaymentMethodRow {
    method: PaymentMethod,
    fee_bps: i64,
    active: bool,
}

fn rate(bps: i64) -> Rate {
    Rate::from_bps(bps.clamp(0, u32::MAX as i64) as u32)
}

#[derive(Debug, Clone)]
pub struct ConfigRepository {
    pool: SqlitePool,
}

impl ConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ConfigRepository { pool }
    }

    pub async fn loyalty(&self) -> DbResult<LoyaltyConfig> {
        let mut conn = self.pool.acquire().await?;
        Self::load_loyalty(&mut conn).await
    }

    pub async fn cashback(&self) -> DbResult<CashbackConfig> {
        let mut conn = self.pool.acquire().await?;
        Self::load_cashback(&mut conn).await
    }

    pub async fn payment_methods(&self) -> DbResult<Vec<PaymentMethodConfig>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_payment_methods(&mut conn).await
    }

    pub async fn save_loyalty(&self, config: &LoyaltyConfig) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO loyalty_config (
                id, active, points_per_real_bps, min_purchase_cents, applies_to_all_products,
                policy, expiration_days, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (id) DO UPDATE SET
                active = excluded.active,
                points_per_real_bps = excluded.points_per_real_bps,
                min_purchase_cents = excluded.min_purchase_cents,
                applies_to_all_products = excluded.applies_to_all_products,
                policy = excluded.policy,
                expiration_days = excluded.expiration_days,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config.active)
        .bind(config.points_per_real.bps() as i64)
        .bind(config.min_purchase.cents())
        .bind(config.eligibility.applies_to_all_products)
        .bind(config.eligibility.policy)
        .bind(config.expiration_days)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        replace_products(&mut tx, "loyalty_config_products", &config.eligibility.eligible_product_ids).await?;

        tx.commit().await?;
        info!(active = config.active, bps = config.points_per_real.bps(), "Loyalty config saved");
        Ok(())
    }

    pub async fn save_cashback(&self, config: &CashbackConfig) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO cashback_config (
                id, active, percentage_bps, min_purchase_cents, max_cashback_per_purchase_cents,
                applies_to_all_products, policy, expiration_days, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO UPDATE SET
                active = excluded.active,
                percentage_bps = excluded.percentage_bps,
                min_purchase_cents = excluded.min_purchase_cents,
                max_cashback_per_purchase_cents = excluded.max_cashback_per_purchase_cents,
                applies_to_all_products = excluded.applies_to_all_products,
                policy = excluded.policy,
                expiration_days = excluded.expiration_days,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config.active)
        .bind(config.percentage.bps() as i64)
        .bind(config.min_purchase.cents())
        .bind(config.max_cashback_per_purchase.map(|m| m.cents()))
        .bind(config.eligibility.applies_to_all_products)
        .bind(config.eligibility.policy)
        .bind(config.expiration_days)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        replace_products(&mut tx, "cashback_config_products", &config.eligibility.eligible_product_ids).await?;

        tx.commit().await?;
        info!(active = config.active, bps = config.percentage.bps(), "Cashback config saved");
        Ok(())
    }

    pub async fn save_payment_method(&self, config: &PaymentMethodConfig) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_method_configs (method, fee_bps, active, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (method) DO UPDATE SET
                fee_bps = excluded.fee_bps,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config.method)
        .bind(config.fee.bps() as i64)
        .bind(config.active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Connection-scoped
    // =========================================================================

    pub async fn load_loyalty(conn: &mut SqliteConnection) -> DbResult<LoyaltyConfig> {
        let row = sqlx::query_as::<_, LoyaltyRow>("SELECT * FROM loyalty_config WHERE id = 1")
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            return Ok(LoyaltyConfig::default());
        };

        let eligibility = load_eligibility(
            conn,
            "loyalty_config_products",
            row.applies_to_all_products,
            row.policy,
        )
        .await?;

        Ok(LoyaltyConfig {
            active: row.active,
            points_per_real: rate(row.points_per_real_bps),
            min_purchase: Money::from_cents(row.min_purchase_cents),
            eligibility,
            expiration_days: row.expiration_days,
        })
    }

    pub async fn load_cashback(conn: &mut SqliteConnection) -> DbResult<CashbackConfig> {
        let row = sqlx::query_as::<_, CashbackRow>("SELECT * FROM cashback_config WHERE id = 1")
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            return Ok(CashbackConfig::default());
        };

        let eligibility = load_eligibility(
            conn,
            "cashback_config_products",
            row.applies_to_all_products,
            row.policy,
        )
        .await?;

        Ok(CashbackConfig {
            active: row.active,
            percentage: rate(row.percentage_bps),
            min_purchase: Money::from_cents(row.min_purchase_cents),
            max_cashback_per_purchase: row.max_cashback_per_purchase_cents.map(Money::from_cents),
            eligibility,
            expiration_days: row.expiration_days,
        })
    }

    /// One entry per method; unconfigured methods come back free.
    pub async fn load_payment_methods(conn: &mut SqliteConnection) -> DbResult<Vec<PaymentMethodConfig>> {
        let rows = sqlx::query_as::<_, PaymentMethodRow>("SELECT * FROM payment_method_configs")
            .fetch_all(&mut *conn)
            .await?;

        Ok(PaymentMethod::ALL
            .iter()
            .map(|method| {
                rows.iter()
                    .find(|r| r.method == *method)
                    .map(|r| PaymentMethodConfig {
                        method: r.method,
                        fee: rate(r.fee_bps),
                        active: r.active,
                    })
                    .unwrap_or_else(|| PaymentMethodConfig::free(*method))
            })
            .collect())
    }
}

async fn load_eligibility(
    conn: &mut SqliteConnection,
    table: &str,
    applies_to_all_products: bool,
    policy: EligibilityPolicy,
) -> DbResult<ProductEligibility> {
    if applies_to_all_products {
        return Ok(ProductEligibility {
            policy,
            ..ProductEligibility::all()
        });
    }

    let sql = format!("SELECT product_id FROM {table} ORDER BY product_id");
    let ids: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&mut *conn).await?;

    Ok(ProductEligibility::only(ids, policy))
}

async fn replace_products(
    conn: &mut SqliteConnection,
    table: &str,
    product_ids: &BTreeSet<String>,
) -> DbResult<()> {
    sqlx::query(&format!("DELETE FROM {table}"))
        .execute(&mut *conn)
        .await?;

    let insert = format!("INSERT INTO {table} (product_id) VALUES (?1)");
    for product_id in product_ids {
        sqlx::query(&insert)
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::catalog::NewProduct;
    use crate::{Database, DbConfig};
    use sorveteria_core::SaleType;

    #[tokio::test]
    async fn test_defaults_when_unconfigured() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        assert!(!db.config().loyalty().await.unwrap().active);
        assert!(!db.config().cashback().await.unwrap().active);

        let methods = db.config().payment_methods().await.unwrap();
        assert_eq!(methods.len(), 5);
        assert!(methods.iter().all(|m| m.fee.is_zero()));
    }

    #[tokio::test]
    async fn test_round_trip_with_eligible_products() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db
            .catalog()
            .create_product(NewProduct {
                category_id: None,
                name: "Açaí 500ml".to_string(),
                sale_type: SaleType::Unit,
                sale_price: Money::from_cents(2200),
                cost_price: Money::from_cents(900),
                track_stock: false,
                initial_stock: 0,
            })
            .await
            .unwrap();

        let config = LoyaltyConfig {
            active: true,
            points_per_real: Rate::from_bps(20_000),
            min_purchase: Money::from_cents(1000),
            eligibility: ProductEligibility::only([product.id.clone()], EligibilityPolicy::ProRated),
            expiration_days: Some(90),
        };
        db.config().save_loyalty(&config).await.unwrap();
        assert_eq!(db.config().loyalty().await.unwrap(), config);

        db.config()
            .save_payment_method(&PaymentMethodConfig {
                method: PaymentMethod::Credit,
                fee: Rate::from_bps(299),
                active: true,
            })
            .await
            .unwrap();
        let methods = db.config().payment_methods().await.unwrap();
        let credit = methods.iter().find(|m| m.method == PaymentMethod::Credit).unwrap();
        assert_eq!(credit.fee.bps(), 299);
    }
}
