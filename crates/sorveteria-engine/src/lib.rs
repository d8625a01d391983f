//! # sorveteria-engine: Application Services
//!
//! Every operation that touches more than one row runs here, inside exactly
//! one store transaction. Pure decisions come from `sorveteria-core`,
//! persistence from `sorveteria-db`.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apps/backoffice (CLI)                                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  sorveteria-engine                                                      │
//! │    CashSessionManager  SettlementEngine  RewardService  CouponService   │
//! │    AccountsService     CardFeeJob  SessionBackfill  StatusSyncJob       │
//! │    ReportService                                                        │
//! ├────────────────────────────────┬────────────────────────────────────────┤
//! │  sorveteria-core (pure rules)  │  sorveteria-db (SQLite repositories)   │
//! └────────────────────────────────┴────────────────────────────────────────┘
//! ```
//!
//! ## Transactions
//! Writers call `db.begin()`, pass `&mut tx` to connection-scoped repository
//! functions and commit once. The first write of a settlement is the guarded
//! `UPDATE` on its cash session, which serializes writers on that session for
//! the rest of the transaction.
//!
//! ## Example
//! ```rust,ignore
//! use sorveteria_db::{Database, DbConfig};
//! use sorveteria_engine::{CashSessionManager, SettlementEngine};
//!
//! let db = Database::new(DbConfig::new("./sorveteria.db")).await?;
//! let session = CashSessionManager::new(db.clone()).open("T1", Money::from_cents(10_000), "ana").await?;
//! let receipt = SettlementEngine::new(db).settle_sale(request).await?;
//! println!("{} {}", receipt.order.order_number, receipt.totals.total);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod accounts;
pub mod cash_session;
pub mod coupons;
pub mod error;
pub mod reconciliation;
pub mod reports;
pub mod rewards;
pub mod settlement;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use accounts::{AccountsService, OverdueReport, PayableDraft, ReceivableDraft};
pub use cash_session::{CashSessionManager, Recalculation, SessionReport};
pub use coupons::{CouponDraft, CouponQuote, CouponService};
pub use error::{EngineError, EngineResult};
pub use reconciliation::{CardFeeJob, SessionBackfill, StatusSyncJob};
pub use reports::{ChannelFigures, ChannelSummary, Dre, DreLine, ReportService};
pub use rewards::{RewardBalances, RewardReversal, RewardService};
pub use settlement::{CloseComanda, DeliveryRequest, ReversalReceipt, SettlementEngine, SettlementReceipt};
