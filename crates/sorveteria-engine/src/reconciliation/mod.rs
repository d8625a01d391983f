//! # Financial Reconciliation Jobs
//!
//! Batch processes that derive ledger rows from committed orders, sessions and
//! obligations. Every job is safe to re-run: what already exists is found by
//! exact reference key, never by a "has this run" flag.
//!
//! ## Jobs
//! ```text
//! ┌──────────────────┬──────────────────────────────┬──────────────────────────┐
//! │ Job              │ Source                       │ Key                      │
//! ├──────────────────┼──────────────────────────────┼──────────────────────────┤
//! │ CardFeeJob       │ payments of settled orders   │ CARD_FEE-{CH}-{id}-{m}   │
//! │ SessionBackfill  │ closed cash sessions         │ CASHSESSION-{id}         │
//! │ StatusSyncJob    │ paid/cancelled obligations   │ PAYABLE-/RECEIVABLE-     │
//! │                  │                              │ (legacy AP-/AR-)         │
//! └──────────────────┴──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Jobs read through the pool, then write through one transaction per run.
//! Dry runs open the same transaction and drop it without committing.

mod backfill;
mod card_fees;
mod status;

pub use backfill::SessionBackfill;
pub use card_fees::CardFeeJob;
pub use status::StatusSyncJob;

use sorveteria_core::FinancialTransaction;

/// Rows of a key that still count. Cancelled rows are history.
pub(crate) fn live(rows: &[FinancialTransaction]) -> impl Iterator<Item = &FinancialTransaction> {
    rows.iter().filter(|row| row.status != sorveteria_core::FinancialStatus::Cancelled)
}
