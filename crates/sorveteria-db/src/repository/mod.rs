//! # Repository Module
//!
//! Database repository implementations for the Sorveteria POS store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Ways In                                          │
//! │                                                                         │
//! │  Reads and standalone writes                                           │
//! │       db.catalog().get_product(id)          ← &self, uses the pool      │
//! │                                                                         │
//! │  Writes inside an engine transaction                                   │
//! │       let mut tx = db.begin().await?;                                   │
//! │       CatalogRepository::decrement_stock(&mut tx, id, qty)             │
//! │       CashSessionRepository::apply_totals(&mut tx, id, &delta)         │
//! │       tx.commit().await?;                    ← associated fns, &mut conn│
//! │                                                                         │
//! │  Pool methods delegate to the associated fns, so each query is         │
//! │  written once.                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - categories, sizes, products, costs, stock
//! - [`cash_session::CashSessionRepository`] - till sessions and breakdowns
//! - [`order::OrderRepository`] - sales, comandas, deliveries, items, payments
//! - [`customer::CustomerRepository`] - customers and reward ledgers
//! - [`coupon::CouponRepository`] - coupons and redemptions
//! - [`config::ConfigRepository`] - loyalty, cashback and payment-method settings
//! - [`finance::FinanceRepository`] - ledger transactions, payables, receivables
//! - [`report::ReportRepository`] - read-only aggregates

pub mod cash_session;
pub mod catalog;
pub mod config;
pub mod coupon;
pub mod customer;
pub mod finance;
pub mod order;
pub mod report;

use uuid::Uuid;

/// Fresh UUID v4 in its string form.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}
