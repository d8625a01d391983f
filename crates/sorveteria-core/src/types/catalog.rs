//! Catalog records: categories, assembled-cup sizes, products and costs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Sale Type
// =============================================================================

/// How a product is priced at the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleType {
    /// Sold by the unit (`sale_price` per item).
    Unit,
    /// Sold by weight (`sale_price` per kilogram, quantities in grams).
    Weight,
}

impl Default for SaleType {
    fn default() -> Self {
        SaleType::Unit
    }
}

// =============================================================================
// Category
// =============================================================================

/// Category behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    Standard,
    /// "Montado": every line needs a size and a flavor count.
    Assembled,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub kind: CategoryKind,
    pub active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Category {
    #[inline]
    pub fn is_assembled(&self) -> bool {
        self.kind == CategoryKind::Assembled
    }
}

/// A cup/cone size offered by an assembled category.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CategorySize {
    pub id: String,
    pub category_id: String,
    /// Short label printed on the ticket ("P", "M", "G").
    pub name: String,
    /// Maximum number of flavors a single cup of this size can hold.
    pub max_flavors: i64,
    pub active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Price of a product when sold in a given size.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductSizePrice {
    pub product_id: String,
    pub size_id: String,
    pub price_cents: i64,
}

impl ProductSizePrice {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product available for sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    pub category_id: Option<String>,

    /// Display name shown to the cashier and on the ticket.
    pub name: String,

    pub sale_type: SaleType,

    /// Price in centavos. Per unit, or per kilogram for weight products.
    pub sale_price_cents: i64,

    /// Fallback cost when no `ProductCost` row is valid.
    pub cost_price_cents: i64,

    /// Whether `current_stock` is enforced on settlement.
    pub track_stock: bool,

    /// Units, or grams for weight products. Never below zero.
    pub current_stock: i64,

    /// Whether product is active (soft delete).
    pub active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn sale_price(&self) -> Money {
        Money::from_cents(self.sale_price_cents)
    }

    #[inline]
    pub fn cost_price(&self) -> Money {
        Money::from_cents(self.cost_price_cents)
    }

    /// Checks whether `quantity` can leave the shelf.
    pub fn has_stock(&self, quantity: i64) -> bool {
        !self.track_stock || self.current_stock >= quantity
    }
}

/// Time-ranged cost of a product. The newest row valid at a given instant wins.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductCost {
    pub id: String,
    pub product_id: String,
    pub cost_cents: i64,
    #[ts(as = "String")]
    pub valid_from: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub valid_to: Option<DateTime<Utc>>,
}

impl ProductCost {
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |to| at < to)
    }
}

/// Picks the cost snapshot for a line: newest valid `ProductCost`, else the product's cost price.
pub fn effective_cost(product: &Product, costs: &[ProductCost], at: DateTime<Utc>) -> Money {
    costs
        .iter()
        .filter(|c| c.product_id == product.id && c.is_valid_at(at))
        .max_by_key(|c| c.valid_from)
        .map(|c| Money::from_cents(c.cost_cents))
        .unwrap_or_else(|| product.cost_price())
}

// =============================================================================
// Unit Tests
// =============================================================================
