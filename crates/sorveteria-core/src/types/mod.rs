//! # Domain Types
//!
//! Core domain records used throughout the Sorveteria POS.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  catalog   Category ─┬─ CategorySize ── ProductSizePrice               │
//! │                      └─ Product ──────── ProductCost                   │
//! │                                                                         │
//! │  cash      CashSession ── CashBreakdownEntry      PaymentMethod        │
//! │                                                                         │
//! │  order     Sale │ Comanda │ DeliveryOrder                              │
//! │               └──────┬──────┘                                          │
//! │                OrderItem • OrderPayment  (keyed by Channel + order id) │
//! │                                                                         │
//! │  customer  Customer ── LoyaltyTransaction • CashbackTransaction        │
//! │                                                                         │
//! │  coupon    Coupon ── CouponRedemption                                  │
//! │                                                                         │
//! │  config    LoyaltyConfig • CashbackConfig • PaymentMethodConfig        │
//! │                                                                         │
//! │  finance   FinancialTransaction • AccountPayable • AccountReceivable   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Every entity uses a UUID v4 string `id`. Orders additionally carry a
//! human-readable `order_number` (`YYYYMMDD-TT-NNNN`).

pub mod cash;
pub mod catalog;
pub mod config;
pub mod coupon;
pub mod customer;
pub mod finance;
pub mod order;

pub use cash::*;
pub use catalog::*;
pub use config::*;
pub use coupon::*;
pub use customer::*;
pub use finance::*;
pub use order::*;
