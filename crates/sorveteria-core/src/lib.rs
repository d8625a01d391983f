//! # sorveteria-core: Pure Business Logic for the Sorveteria POS
//!
//! Everything in this crate is a pure function of its inputs. The database
//! layer resolves rows, this crate decides what they mean.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sorveteria Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          REST controllers / React back-office (external)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ validated DTOs                         │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    sorveteria-engine                            │   │
//! │  │   CashSessionManager • SettlementEngine • Reconciliation        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ sorveteria-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   money • pricing • settlement • rewards • coupon • session    │   │
//! │  │   fees • reconcile • validation • types                         │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 sorveteria-db (SQLite, repositories)            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - `Money` (centavos) and `Rate` (basis points)
//! - [`types`] - Domain records (catalog, cash sessions, orders, customers, finance)
//! - [`error`] - Typed domain errors
//! - [`validation`] - Input validation
//! - [`pricing`] - Line pricing (unit, weight, assembled cups)
//! - [`settlement`] - Channel-neutral settlement request and totals
//! - [`rewards`] - Loyalty points and cashback accrual
//! - [`coupon`] - Coupon eligibility and discount computation
//! - [`session`] - Cash-session state machine and drawer totals
//! - [`fees`] - Payment-method fee computation and ledger reference keys
//! - [`reconcile`] - Outcome types shared by the reconciliation jobs
//!
//! ## Example Usage
//!
//! ```rust
//! use sorveteria_core::money::{Money, Rate};
//!
//! let total = Money::from_cents(3600); // R$36.00
//! let fee = total.apply_rate(Rate::from_bps(199)); // 1.99%
//! assert_eq!(fee.cents(), 72);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod coupon;
pub mod error;
pub mod fees;
pub mod money;
pub mod pricing;
pub mod reconcile;
pub mod rewards;
pub mod session;
pub mod settlement;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::{Money, Rate};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items in a single order.
pub const MAX_ORDER_ITEMS: usize = 100;

/// Maximum quantity of a single unit-priced line.
///
/// Prevents accidental over-ordering (typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum weight of a single weight-priced line, in grams (20 kg).
pub const MAX_ITEM_WEIGHT_GRAMS: i64 = 20_000;

/// Maximum payment rows on a single settlement.
pub const MAX_PAYMENTS: usize = 10;
