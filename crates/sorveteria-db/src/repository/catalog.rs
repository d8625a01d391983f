//! # Catalog Repository
//!
//! Categories, assembled-cup sizes, products, size prices, cost history and
//! stock movements.
//!
//! ## Stock Writes
//! ```text
//! decrement_stock   UPDATE ... SET current_stock = current_stock - q
//!                   WHERE id = ? AND current_stock >= q
//!                   rows_affected == 0  →  not enough stock (caller decides)
//!
//! restock           UPDATE ... SET current_stock = current_stock + q
//! ```
//!
//! The guard lives in the UPDATE itself so two settlements can never both
//! pass a stale read of the same shelf.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::{DbError, DbResult};
use sorveteria_core::{
    Category, CategoryKind, CategorySize, Money, Product, ProductCost, SaleType,
};

/// Input for [`CatalogRepository::create_product`].
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub category_id: Option<String>,
    pub name: String,
    pub sale_type: SaleType,
    /// Per unit, or per kilogram for weight products.
    pub sale_price: Money,
    pub cost_price: Money,
    pub track_stock: bool,
    /// Units, or grams for weight products.
    pub initial_stock: i64,
}

/// Repository for catalog operations.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Categories and Sizes
    // =========================================================================

    pub async fn create_category(&self, name: &str, kind: CategoryKind) -> DbResult<Category> {
        let category = Category {
            id: new_id(),
            name: name.to_string(),
            kind,
            active: true,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO categories (id, name, kind, active, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(category.kind)
        .bind(category.active)
        .bind(category.created_at)
        .execute(&self.pool)
        .await?;

        debug!(category_id = %category.id, name = %category.name, "Category created");
        Ok(category)
    }

    pub async fn get_category(&self, id: &str) -> DbResult<Option<Category>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_category(&mut conn, id).await
    }

    pub async fn list_categories(&self) -> DbResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    pub async fn create_size(
        &self,
        category_id: &str,
        name: &str,
        max_flavors: i64,
    ) -> DbResult<CategorySize> {
        let size = CategorySize {
            id: new_id(),
            category_id: category_id.to_string(),
            name: name.to_string(),
            max_flavors,
            active: true,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO category_sizes (id, category_id, name, max_flavors, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&size.id)
        .bind(&size.category_id)
        .bind(&size.name)
        .bind(size.max_flavors)
        .bind(size.active)
        .bind(size.created_at)
        .execute(&self.pool)
        .await?;

        Ok(size)
    }

    pub async fn get_size(&self, id: &str) -> DbResult<Option<CategorySize>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_size(&mut conn, id).await
    }

    pub async fn list_sizes(&self, category_id: &str) -> DbResult<Vec<CategorySize>> {
        let sizes = sqlx::query_as::<_, CategorySize>(
            "SELECT * FROM category_sizes WHERE category_id = ?1 ORDER BY max_flavors, name",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sizes)
    }

    /// Sets (or replaces) a product's price in a size.
    pub async fn set_size_price(&self, product_id: &str, size_id: &str, price: Money) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_size_prices (product_id, size_id, price_cents)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (product_id, size_id) DO UPDATE SET price_cents = excluded.price_cents
            "#,
        )
        .bind(product_id)
        .bind(size_id)
        .bind(price.cents())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_size_price(&self, product_id: &str, size_id: &str) -> DbResult<Option<Money>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_size_price(&mut conn, product_id, size_id).await
    }

    // =========================================================================
    // Products
    // =========================================================================

    pub async fn create_product(&self, new: NewProduct) -> DbResult<Product> {
        let now = Utc::now();
        let product = Product {
            id: new_id(),
            category_id: new.category_id,
            name: new.name,
            sale_type: new.sale_type,
            sale_price_cents: new.sale_price.cents(),
            cost_price_cents: new.cost_price.cents(),
            track_stock: new.track_stock,
            current_stock: new.initial_stock,
            active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO products (
                id, category_id, name, sale_type, sale_price_cents, cost_price_cents,
                track_stock, current_stock, active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.category_id)
        .bind(&product.name)
        .bind(product.sale_type)
        .bind(product.sale_price_cents)
        .bind(product.cost_price_cents)
        .bind(product.track_stock)
        .bind(product.current_stock)
        .bind(product.active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(product_id = %product.id, name = %product.name, "Product created");
        Ok(product)
    }

    pub async fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_product(&mut conn, id).await
    }

    pub async fn list_products(&self, active_only: bool) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE (?1 = 0 OR active = 1) ORDER BY name",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    /// Soft-deletes a product. Historical lines keep their snapshots.
    pub async fn deactivate_product(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE products SET active = 0, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Inventory entry or correction. The result may not go below zero.
    pub async fn adjust_stock(&self, id: &str, delta: i64) -> DbResult<Product> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET current_stock = current_stock + ?1, updated_at = ?2
            WHERE id = ?3 AND current_stock + ?1 >= 0
            "#,
        )
        .bind(delta)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let product = self
            .get_product(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))?;

        if result.rows_affected() == 0 {
            return Err(DbError::CheckViolation {
                message: format!(
                    "stock of {} would drop below zero ({} {:+})",
                    product.name, product.current_stock, delta
                ),
            });
        }

        debug!(product_id = %id, delta, stock = product.current_stock, "Stock adjusted");
        Ok(product)
    }

    /// Adds a cost row starting at `valid_from`, closing the currently open one.
    pub async fn add_product_cost(
        &self,
        product_id: &str,
        cost: Money,
        valid_from: DateTime<Utc>,
    ) -> DbResult<ProductCost> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE product_costs SET valid_to = ?1
            WHERE product_id = ?2 AND valid_to IS NULL AND valid_from <= ?1
            "#,
        )
        .bind(valid_from)
        .bind(product_id)
        .execute(&mut *tx)
        .await?;

        let row = ProductCost {
            id: new_id(),
            product_id: product_id.to_string(),
            cost_cents: cost.cents(),
            valid_from,
            valid_to: None,
        };

        sqlx::query(
            "INSERT INTO product_costs (id, product_id, cost_cents, valid_from, valid_to) VALUES (?1, ?2, ?3, ?4, NULL)",
        )
        .bind(&row.id)
        .bind(&row.product_id)
        .bind(row.cost_cents)
        .bind(row.valid_from)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    pub async fn list_product_costs(&self, product_id: &str) -> DbResult<Vec<ProductCost>> {
        let mut conn = self.pool.acquire().await?;
        Self::costs_for(&mut conn, product_id).await
    }

    // =========================================================================
    // Connection-scoped (usable inside a transaction)
    // =========================================================================

    pub async fn find_product(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(product)
    }

    pub async fn find_category(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Category>> {
        let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(category)
    }

    pub async fn find_size(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<CategorySize>> {
        let size = sqlx::query_as::<_, CategorySize>("SELECT * FROM category_sizes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(size)
    }

    pub async fn find_size_price(
        conn: &mut SqliteConnection,
        product_id: &str,
        size_id: &str,
    ) -> DbResult<Option<Money>> {
        let cents: Option<i64> = sqlx::query_scalar(
            "SELECT price_cents FROM product_size_prices WHERE product_id = ?1 AND size_id = ?2",
        )
        .bind(product_id)
        .bind(size_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(cents.map(Money::from_cents))
    }

    /// Cost history of a product, oldest first.
    pub async fn costs_for(conn: &mut SqliteConnection, product_id: &str) -> DbResult<Vec<ProductCost>> {
        let costs = sqlx::query_as::<_, ProductCost>(
            "SELECT * FROM product_costs WHERE product_id = ?1 ORDER BY valid_from",
        )
        .bind(product_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(costs)
    }

    /// Takes `quantity` off the shelf. Returns false when the shelf cannot cover it.
    pub async fn decrement_stock(
        conn: &mut SqliteConnection,
        product_id: &str,
        quantity: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET current_stock = current_stock - ?1, updated_at = ?2
            WHERE id = ?3 AND track_stock = 1 AND current_stock >= ?1
            "#,
        )
        .bind(quantity)
        .bind(Utc::now())
        .bind(product_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Puts `quantity` back on the shelf (reversals).
    pub async fn restock(conn: &mut SqliteConnection, product_id: &str, quantity: i64) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET current_stock = current_stock + ?1, updated_at = ?2
            WHERE id = ?3 AND track_stock = 1
            "#,
        )
        .bind(quantity)
        .bind(Utc::now())
        .bind(product_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
