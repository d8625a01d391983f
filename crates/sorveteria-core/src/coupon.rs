//! # Coupon Evaluation
//!
//! Decides whether a coupon applies to a base amount and how much it takes off.
//! Evaluation never mutates; usage is recorded by the settlement transaction.
//!
//! ## Checks (in order)
//! ```text
//! inactive                         → InvalidState
//! now outside [valid_from, valid_to] → InvalidState
//! usage_count >= usage_limit       → InvalidState
//! restricted to another customer   → InvalidState
//! base < min_purchase              → InvalidState
//!
//! fixed       → min(value, base)
//! percentage  → base × rate, capped at max_discount, never above base
//! ```

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Coupon, DiscountType};

/// Discount this coupon grants on `base` for `customer_id` at `now`.
pub fn evaluate(
    coupon: &Coupon,
    base: Money,
    customer_id: Option<&str>,
    now: DateTime<Utc>,
) -> CoreResult<Money> {
    let reject = |reason: &str| -> CoreResult<Money> {
        Err(CoreError::invalid_state("Coupon", &coupon.code, reason))
    };

    if !coupon.active {
        return reject("coupon is inactive");
    }

    if !coupon.is_within_window(now) {
        return reject("coupon is outside its validity window");
    }

    if coupon.is_exhausted() {
        return reject("coupon usage limit reached");
    }

    if let Some(owner) = coupon.customer_id.as_deref() {
        if customer_id != Some(owner) {
            return reject("coupon is restricted to another customer");
        }
    }

    if base < coupon.min_purchase() {
        return Err(CoreError::invalid_state(
            "Coupon",
            &coupon.code,
            format!("minimum purchase is {}", coupon.min_purchase()),
        ));
    }

    Ok(discount_for(coupon, base))
}

/// Raw discount arithmetic, without eligibility checks.
pub fn discount_for(coupon: &Coupon, base: Money) -> Money {
    if !base.is_positive() {
        return Money::zero();
    }

    let discount = match coupon.discount_type {
        DiscountType::Fixed => Money::from_cents(coupon.discount_value.max(0)),
        DiscountType::Percentage => {
            let raw = base.apply_rate(coupon.rate());
            match coupon.max_discount() {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
    };

    discount.min(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Duration;

    fn coupon(discount_type: DiscountType, value: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: "c1".to_string(),
            code: "VERAO10".to_string(),
            description: None,
            discount_type,
            discount_value: value,
            min_purchase_cents: 2000,
            max_discount_cents: None,
            usage_limit: Some(2),
            usage_count: 0,
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(1),
            customer_id: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_fixed_discount_capped_at_base() {
        let c = coupon(DiscountType::Fixed, 500);
        assert_eq!(evaluate(&c, Money::from_cents(3600), None, Utc::now()).unwrap().cents(), 500);

        let mut big = coupon(DiscountType::Fixed, 5000);
        big.min_purchase_cents = 0;
        assert_eq!(evaluate(&big, Money::from_cents(3600), None, Utc::now()).unwrap().cents(), 3600);
    }

    #[test]
    fn test_percentage_discount_with_cap() {
        let mut c = coupon(DiscountType::Percentage, 1000);
        assert_eq!(evaluate(&c, Money::from_cents(3600), None, Utc::now()).unwrap().cents(), 360);

        c.max_discount_cents = Some(200);
        assert_eq!(evaluate(&c, Money::from_cents(3600), None, Utc::now()).unwrap().cents(), 200);
    }

    #[test]
    fn test_rejections_are_invalid_state() {
        let now = Utc::now();

        let mut exhausted = coupon(DiscountType::Fixed, 500);
        exhausted.usage_count = 2;
        assert_eq!(
            evaluate(&exhausted, Money::from_cents(3600), None, now).unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        let mut expired = coupon(DiscountType::Fixed, 500);
        expired.valid_to = now - Duration::hours(1);
        assert!(evaluate(&expired, Money::from_cents(3600), None, now).is_err());

        let below_min = coupon(DiscountType::Fixed, 500);
        assert!(evaluate(&below_min, Money::from_cents(1999), None, now).is_err());

        let mut inactive = coupon(DiscountType::Fixed, 500);
        inactive.active = false;
        assert!(evaluate(&inactive, Money::from_cents(3600), None, now).is_err());
    }

    #[test]
    fn test_customer_restriction() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Fixed, 500);
        c.customer_id = Some("ana".to_string());

        assert!(evaluate(&c, Money::from_cents(3600), Some("ana"), now).is_ok());
        assert!(evaluate(&c, Money::from_cents(3600), Some("bia"), now).is_err());
        assert!(evaluate(&c, Money::from_cents(3600), None, now).is_err());
    }
}
