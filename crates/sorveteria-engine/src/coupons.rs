//! # Coupon Service
//!
//! Creation, read-only validation, and the apply/release pair the settlement
//! engine calls inside its transaction.
//!
//! ## Usage Accounting
//! ```text
//! validate(code, base, customer)   read only, returns the discount quote
//!        │
//!        ▼  (inside the settlement transaction)
//! apply(coupon, customer, order, discount)
//!        ├── usage_count += 1   guarded: usage_count < usage_limit
//!        └── redemption row
//!        │
//!        ▼  (order cancelled or reopened)
//! release(order)
//!        ├── redemption.reversed = 1
//!        └── usage_count -= 1
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::error::EngineResult;
use sorveteria_core::coupon as rules;
use sorveteria_core::validation::{normalize_coupon_code, validate_positive_cents, validate_rate_bps, validate_text};
use sorveteria_core::{Coupon, CouponRedemption, CoreError, DiscountType, Money, OrderRef, ValidationError};
use sorveteria_db::{CouponRepository, Database, NewCoupon};

/// Input of `create_coupon`. The code is normalized before storage.
#[derive(Debug, Clone)]
pub struct CouponDraft {
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

/// Result of a read-only validation.
#[derive(Debug, Clone, Serialize)]
pub struct CouponQuote {
    pub coupon: Coupon,
    pub base: Money,
    pub discount: Money,
}

#[derive(Debug, Clone)]
pub struct CouponService {
    db: Database,
}

impl CouponService {
    pub fn new(db: Database) -> Self {
        CouponService { db }
    }

    pub async fn create_coupon(&self, draft: CouponDraft) -> EngineResult<Coupon> {
        let code = normalize_coupon_code(&draft.code)?;
        let description = draft
            .description
            .as_deref()
            .map(|d| validate_text("description", d, 200))
            .transpose()?;

        match draft.discount_type {
            DiscountType::Fixed => validate_positive_cents("discount_value", draft.discount_value)?,
            DiscountType::Percentage => {
                if draft.discount_value <= 0 {
                    return Err(ValidationError::MustBePositive {
                        field: "discount_value".to_string(),
                    }
                    .into());
                }
                validate_rate_bps("discount_value", draft.discount_value, 10_000)?;
            }
        }

        if draft.min_purchase.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "min_purchase".to_string(),
            }
            .into());
        }
        if let Some(limit) = draft.usage_limit {
            if limit <= 0 {
                return Err(ValidationError::MustBePositive {
                    field: "usage_limit".to_string(),
                }
                .into());
            }
        }
        if draft.valid_from >= draft.valid_to {
            return Err(ValidationError::InvalidFormat {
                field: "valid_to".to_string(),
                reason: "must be after valid_from".to_string(),
            }
            .into());
        }

        if let Some(customer_id) = draft.customer_id.as_deref() {
            if self.db.customers().get(customer_id).await?.is_none() {
                return Err(CoreError::not_found("Customer", customer_id).into());
            }
        }

        let created = self
            .db
            .coupons()
            .create(NewCoupon {
                code: code.clone(),
                description,
                discount_type: draft.discount_type,
                discount_value: draft.discount_value,
                min_purchase: draft.min_purchase,
                max_discount: draft.max_discount,
                usage_limit: draft.usage_limit,
                valid_from: draft.valid_from,
                valid_to: draft.valid_to,
                customer_id: draft.customer_id,
            })
            .await;

        let coupon = match created {
            Ok(coupon) => coupon,
            Err(err) if err.is_unique_violation() => {
                return Err(CoreError::conflict("Coupon", format!("code {} already exists", code)).into())
            }
            Err(err) => return Err(err.into()),
        };

        info!(coupon_id = %coupon.id, code = %coupon.code, "Coupon created");
        Ok(coupon)
    }

    /// Computes the discount a coupon would give. Never mutates.
    pub async fn validate(&self, code: &str, base: Money, customer_id: Option<&str>) -> EngineResult<CouponQuote> {
        let mut conn = self.db.pool().acquire().await?;
        let (coupon, discount) = Self::quote(&mut conn, code, base, customer_id, Utc::now()).await?;
        Ok(CouponQuote { coupon, base, discount })
    }

    pub async fn set_active(&self, coupon_id: &str, active: bool) -> EngineResult<()> {
        if !self.db.coupons().set_active(coupon_id, active).await? {
            return Err(CoreError::not_found("Coupon", coupon_id).into());
        }
        info!(coupon_id = %coupon_id, active, "Coupon toggled");
        Ok(())
    }

    // =========================================================================
    // Inside a settlement transaction
    // =========================================================================

    pub(crate) async fn quote(
        conn: &mut SqliteConnection,
        code: &str,
        base: Money,
        customer_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<(Coupon, Money)> {
        let code = normalize_coupon_code(code)?;
        let coupon = CouponRepository::find_by_code(conn, &code)
            .await?
            .ok_or_else(|| CoreError::not_found("Coupon", code.as_str()))?;
        let discount = rules::evaluate(&coupon, base, customer_id, now)?;
        Ok((coupon, discount))
    }

    /// Counts the use and records the redemption.
    pub(crate) async fn apply(
        conn: &mut SqliteConnection,
        coupon: &Coupon,
        customer_id: Option<&str>,
        order: &OrderRef,
        discount: Money,
    ) -> EngineResult<CouponRedemption> {
        if !CouponRepository::increment_usage(conn, &coupon.id).await? {
            return Err(CoreError::invalid_state("Coupon", &coupon.code, "coupon usage limit reached").into());
        }
        let redemption =
            CouponRepository::insert_redemption(conn, &coupon.id, customer_id, order.channel, &order.order_id, discount)
                .await?;
        debug!(coupon_id = %coupon.id, order = %order, discount = %discount, "Coupon applied");
        Ok(redemption)
    }

    /// Gives back the use an order took, if it took one.
    pub(crate) async fn release(conn: &mut SqliteConnection, order: &OrderRef) -> EngineResult<bool> {
        match CouponRepository::active_redemption(conn, order.channel, &order.order_id).await? {
            Some(redemption) => {
                CouponRepository::release(conn, &redemption).await?;
                debug!(coupon_id = %redemption.coupon_id, order = %order, "Coupon released");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
