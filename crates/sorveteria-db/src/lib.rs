//! # sorveteria-db: Database Layer for the Sorveteria POS
//!
//! SQLite storage through sqlx. Owns the schema, the connection pool and one
//! repository per aggregate. Business rules live in `sorveteria-core`;
//! transaction boundaries live in `sorveteria-engine`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sorveteria Data Flow                              │
//! │                                                                         │
//! │  SettlementEngine::settle_sale(request)                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  sorveteria-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ CatalogRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ CashSessionRepo│    │ 001_initial_ │  │   │
//! │  │   │ begin() → tx  │    │ OrderRepo ...  │    │   schema.sql │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sorveteria_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("sorveteria.db")).await?;
//!
//! let session = db.cash_sessions().find_open("T1").await?;
//! let products = db.catalog().list_products(true).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cash_session::CashSessionRepository;
pub use repository::catalog::{CatalogRepository, NewProduct};
pub use repository::config::ConfigRepository;
pub use repository::coupon::{CouponRepository, NewCoupon};
pub use repository::customer::{CustomerRepository, LedgerPosting, NewCustomer};
pub use repository::finance::{FinanceRepository, NewFinancialTransaction, NewPayable, NewReceivable};
pub use repository::order::{OrderRepository, SettledOrder};
pub use repository::report::{CategoryTotal, ChannelTotals, MethodTotal, ProductSales, ReportRepository};
