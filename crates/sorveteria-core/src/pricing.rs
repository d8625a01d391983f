//! # Line Pricing
//!
//! Turns one requested line into a priced, snapshotted line.
//!
//! ## Pricing Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Product kind          Unit price                 Subtotal              │
//! │  ───────────────────   ────────────────────────   ───────────────────  │
//! │  Unit                  sale_price                 unit × quantity      │
//! │  Weight (per kg)       sale_price                 price × grams / 1000 │
//! │  Assembled ("Montado") size_price / flavor_count  unit × quantity      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The caller resolves rows (product, category, size, size price, cost);
//! everything here is a pure function of those rows and the request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Category, CategorySize, Product, SaleType};
use crate::validation::{validate_flavor_count, validate_quantity, validate_weight_grams};

// =============================================================================
// Request / Result
// =============================================================================

/// One requested line, as it arrives from the counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ItemRequest {
    pub product_id: String,
    /// Units. Ignored for weight products.
    pub quantity: i64,
    /// Scale reading, required for weight products.
    pub weight_grams: Option<i64>,
    /// Required for assembled-category products.
    pub size_id: Option<String>,
    /// Required for assembled-category products.
    pub flavor_count: Option<i64>,
}

impl ItemRequest {
    pub fn unit(product_id: impl Into<String>, quantity: i64) -> Self {
        ItemRequest {
            product_id: product_id.into(),
            quantity,
            weight_grams: None,
            size_id: None,
            flavor_count: None,
        }
    }

    pub fn weighed(product_id: impl Into<String>, grams: i64) -> Self {
        ItemRequest {
            product_id: product_id.into(),
            quantity: 1,
            weight_grams: Some(grams),
            size_id: None,
            flavor_count: None,
        }
    }

    pub fn assembled(
        product_id: impl Into<String>,
        quantity: i64,
        size_id: impl Into<String>,
        flavor_count: i64,
    ) -> Self {
        ItemRequest {
            product_id: product_id.into(),
            quantity,
            weight_grams: None,
            size_id: Some(size_id.into()),
            flavor_count: Some(flavor_count),
        }
    }
}

/// Rows resolved by the caller for one line.
#[derive(Debug, Clone, Copy)]
pub struct PricingContext<'a> {
    pub product: &'a Product,
    pub category: Option<&'a Category>,
    /// The size named by the request, if it was found.
    pub size: Option<&'a CategorySize>,
    /// The product's price in that size, if one is configured.
    pub size_price: Option<Money>,
    /// Cost per unit (or per kilogram) valid at settlement time.
    pub unit_cost: Money,
}

/// A priced line ready to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedLine {
    pub product_id: String,
    pub product_name: String,
    pub sale_type: SaleType,
    pub size_id: Option<String>,
    pub size_name: Option<String>,
    pub flavor_count: Option<i64>,
    pub quantity: i64,
    pub weight_grams: Option<i64>,
    pub unit_price: Money,
    pub cost: Money,
    pub subtotal: Money,
    pub track_stock: bool,
    /// Units, or grams for weight lines.
    pub stock_quantity: i64,
}

// =============================================================================
// Pricing
// =============================================================================

/// Prices a single line.
///
/// ## Errors
/// - `ValidationError`: bad quantity, weight or flavor count
/// - `InvalidState`: inactive product, missing or foreign size, unpriced size
pub fn price_line(request: &ItemRequest, ctx: &PricingContext<'_>) -> CoreResult<PricedLine> {
    let product = ctx.product;

    if !product.active {
        return Err(CoreError::invalid_state("Product", &product.id, "product is inactive"));
    }

    let assembled = ctx.category.filter(|c| c.is_assembled());

    if let Some(category) = assembled {
        return price_assembled(request, ctx, category);
    }

    match product.sale_type {
        SaleType::Weight => {
            let grams = request
                .weight_grams
                .ok_or_else(|| ValidationError::required("weight_grams"))?;
            validate_weight_grams(grams)?;

            Ok(PricedLine {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                sale_type: SaleType::Weight,
                size_id: None,
                size_name: None,
                flavor_count: None,
                quantity: 1,
                weight_grams: Some(grams),
                unit_price: product.sale_price(),
                cost: ctx.unit_cost.per_kilogram(grams),
                subtotal: product.sale_price().per_kilogram(grams),
                track_stock: product.track_stock,
                stock_quantity: grams,
            })
        }
        SaleType::Unit => {
            validate_quantity(request.quantity)?;

            Ok(PricedLine {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                sale_type: SaleType::Unit,
                size_id: None,
                size_name: None,
                flavor_count: None,
                quantity: request.quantity,
                weight_grams: None,
                unit_price: product.sale_price(),
                cost: ctx.unit_cost.multiply_quantity(request.quantity),
                subtotal: product.sale_price().multiply_quantity(request.quantity),
                track_stock: product.track_stock,
                stock_quantity: request.quantity,
            })
        }
    }
}

fn price_assembled(
    request: &ItemRequest,
    ctx: &PricingContext<'_>,
    category: &Category,
) -> CoreResult<PricedLine> {
    let product = ctx.product;

    validate_quantity(request.quantity)?;

    let size_id = request.size_id.as_deref().ok_or_else(|| {
        CoreError::invalid_state("Product", &product.id, "assembled products require a size")
    })?;

    let size = ctx
        .size
        .filter(|s| s.id == size_id && s.category_id == category.id && s.active)
        .ok_or_else(|| {
            CoreError::invalid_state(
                "CategorySize",
                size_id,
                format!("size does not belong to category {}", category.name),
            )
        })?;

    let flavor_count = request
        .flavor_count
        .ok_or_else(|| ValidationError::required("flavor_count"))?;
    validate_flavor_count(flavor_count, size.max_flavors)?;

    let size_price = ctx.size_price.ok_or_else(|| {
        CoreError::invalid_state(
            "Product",
            &product.id,
            format!("no price configured for size {}", size.name),
        )
    })?;

    let unit_price = size_price.divide_round(flavor_count);

    Ok(PricedLine {
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        sale_type: SaleType::Unit,
        size_id: Some(size.id.clone()),
        size_name: Some(size.name.clone()),
        flavor_count: Some(flavor_count),
        quantity: request.quantity,
        weight_grams: None,
        unit_price,
        cost: ctx
            .unit_cost
            .divide_round(flavor_count)
            .multiply_quantity(request.quantity),
        subtotal: unit_price.multiply_quantity(request.quantity),
        track_stock: product.track_stock,
        stock_quantity: request.quantity,
    })
}

// =============================================================================
// Stock
// =============================================================================

/// Sums stock requirements per tracked product across all lines.
///
/// Two lines of the same product must be checked against the shelf together.
pub fn stock_requirements(lines: &[PricedLine]) -> BTreeMap<String, i64> {
    let mut required = BTreeMap::new();
    for line in lines.iter().filter(|l| l.track_stock) {
        *required.entry(line.product_id.clone()).or_insert(0) += line.stock_quantity;
    }
    required
}

/// Fails with `InsufficientStock` when a tracked product cannot cover `requested`.
pub fn ensure_stock(product: &Product, requested: i64) -> CoreResult<()> {
    if product.has_stock(requested) {
        return Ok(());
    }

    Err(CoreError::InsufficientStock {
        product: product.name.clone(),
        available: product.current_stock,
        requested,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::CategoryKind;
    use chrono::Utc;

    fn product(sale_type: SaleType, price: i64) -> Product {
        let now = Utc::now();
        Product {
            id: "p1".to_string(),
            category_id: Some("cat".to_string()),
            name: "Chocolate Belga".to_string(),
            sale_type,
            sale_price_cents: price,
            cost_price_cents: 300,
            track_stock: true,
            current_stock: 10,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn category(kind: CategoryKind) -> Category {
        Category {
            id: "cat".to_string(),
            name: "Montado".to_string(),
            kind,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn size_g() -> CategorySize {
        CategorySize {
            id: "size-g".to_string(),
            category_id: "cat".to_string(),
            name: "G".to_string(),
            max_flavors: 3,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unit_line() {
        let p = product(SaleType::Unit, 1800);
        let ctx = PricingContext {
            product: &p,
            category: None,
            size: None,
            size_price: None,
            unit_cost: Money::from_cents(700),
        };
        let line = price_line(&ItemRequest::unit("p1", 2), &ctx).unwrap();
        assert_eq!(line.subtotal.cents(), 3600);
        assert_eq!(line.cost.cents(), 1400);
        assert_eq!(line.stock_quantity, 2);
    }

    #[test]
    fn test_weight_line() {
        let p = product(SaleType::Weight, 5990);
        let ctx = PricingContext {
            product: &p,
            category: None,
            size: None,
            size_price: None,
            unit_cost: Money::from_cents(2000),
        };
        let line = price_line(&ItemRequest::weighed("p1", 350), &ctx).unwrap();
        assert_eq!(line.subtotal.cents(), 2097);
        assert_eq!(line.cost.cents(), 700);
        assert_eq!(line.stock_quantity, 350);
        assert_eq!(line.quantity, 1);

        let missing = ItemRequest::unit("p1", 1);
        let err = price_line(&missing, &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_assembled_line_splits_size_price() {
        let p = product(SaleType::Unit, 0);
        let cat = category(CategoryKind::Assembled);
        let size = size_g();
        let ctx = PricingContext {
            product: &p,
            category: Some(&cat),
            size: Some(&size),
            size_price: Some(Money::from_cents(1800)),
            unit_cost: Money::from_cents(600),
        };
        let line = price_line(&ItemRequest::assembled("p1", 1, "size-g", 3), &ctx).unwrap();
        assert_eq!(line.unit_price.cents(), 600);
        assert_eq!(line.subtotal.cents(), 600);
        assert_eq!(line.cost.cents(), 200);
        assert_eq!(line.size_name.as_deref(), Some("G"));
    }

    #[test]
    fn test_assembled_too_many_flavors_is_validation_error() {
        let p = product(SaleType::Unit, 0);
        let cat = category(CategoryKind::Assembled);
        let size = size_g();
        let ctx = PricingContext {
            product: &p,
            category: Some(&cat),
            size: Some(&size),
            size_price: Some(Money::from_cents(1800)),
            unit_cost: Money::zero(),
        };
        let err = price_line(&ItemRequest::assembled("p1", 1, "size-g", 4), &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_assembled_without_size_is_invalid_state() {
        let p = product(SaleType::Unit, 0);
        let cat = category(CategoryKind::Assembled);
        let ctx = PricingContext {
            product: &p,
            category: Some(&cat),
            size: None,
            size_price: None,
            unit_cost: Money::zero(),
        };
        let err = price_line(&ItemRequest::unit("p1", 1), &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let mut foreign = size_g();
        foreign.category_id = "other".to_string();
        let ctx = PricingContext {
            size: Some(&foreign),
            size_price: Some(Money::from_cents(1000)),
            ..ctx
        };
        let err = price_line(&ItemRequest::assembled("p1", 1, "size-g", 1), &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_inactive_product_is_invalid_state() {
        let mut p = product(SaleType::Unit, 500);
        p.active = false;
        let ctx = PricingContext {
            product: &p,
            category: None,
            size: None,
            size_price: None,
            unit_cost: Money::zero(),
        };
        let err = price_line(&ItemRequest::unit("p1", 1), &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_stock_requirements_merge_lines() {
        let p = product(SaleType::Unit, 500);
        let ctx = PricingContext {
            product: &p,
            category: None,
            size: None,
            size_price: None,
            unit_cost: Money::zero(),
        };
        let a = price_line(&ItemRequest::unit("p1", 4), &ctx).unwrap();
        let b = price_line(&ItemRequest::unit("p1", 7), &ctx).unwrap();
        let required = stock_requirements(&[a, b]);
        assert_eq!(required.get("p1"), Some(&11));

        let err = ensure_stock(&p, 11).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert!(ensure_stock(&p, 10).is_ok());
    }
}
