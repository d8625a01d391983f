//! # Error Types
//!
//! Domain-specific error types for sorveteria-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  sorveteria-core errors (this file)                                    │
//! │  ├── CoreError        - Business rule violations (typed kinds)         │
//! │  └── ValidationError  - Malformed / out-of-range input                 │
//! │                                                                         │
//! │  sorveteria-db errors (separate crate)                                 │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  sorveteria-engine errors                                              │
//! │  └── EngineError      - Domain or store failure, exposes ErrorKind     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → transport status    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The contract towards callers is the [`ErrorKind`], never an HTTP status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Kind
// =============================================================================

/// Copyable discriminant of every failure the core can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    InsufficientStock,
    InsufficientBalance,
    ValidationError,
    /// Store failure that carries no business meaning (I/O, pool, SQL).
    Store,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Referenced session, product, customer, coupon or account does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Uniqueness rule broken (second open session on a terminal, duplicate code).
    #[error("{entity} conflict: {reason}")]
    Conflict { entity: String, reason: String },

    /// Entity is not in the lifecycle state the operation requires.
    ///
    /// ## When This Occurs
    /// - Closing an already closed cash session
    /// - Settling against a session that is not `open`
    /// - Assembling a cup without a valid size
    /// - Coupon outside its validity window or exhausted
    #[error("{entity} {id} is in an invalid state: {reason}")]
    InvalidState {
        entity: String,
        id: String,
        reason: String,
    },

    /// Insufficient stock to complete a settlement.
    ///
    /// ## User Workflow
    /// ```text
    /// Scoop request (qty: 5)
    ///      │
    ///      ▼
    /// Check stock: available=3
    ///      │
    ///      ▼
    /// InsufficientStock { product: "Pote Chocolate 2L", available: 3, requested: 5 }
    /// ```
    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// Loyalty points or cashback balance cannot cover a redemption.
    #[error("Insufficient {balance} balance: available {available}, requested {requested}")]
    InsufficientBalance {
        balance: String,
        available: i64,
        requested: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Conflict error.
    pub fn conflict(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Conflict {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::InvalidState {
            entity: entity.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the typed kind callers branch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Conflict { .. } => ErrorKind::Conflict,
            CoreError::InvalidState { .. } => ErrorKind::InvalidState,
            CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CoreError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            CoreError::Validation(_) => ErrorKind::ValidationError,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any store access.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Discounts exceed what the order is worth.
    #[error("Order total would be negative ({total_cents} cents)")]
    NegativeTotal { total_cents: i64 },

    /// Payments exceed the total by more than the cash tendered.
    #[error("Only cash can be overpaid: {excess_cents} cents over, {cash_cents} cents in cash")]
    NonCashOverpayment { excess_cents: i64, cash_cents: i64 },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    pub fn out_of_range(field: impl Into<String>, min: i64, max: i64) -> Self {
        ValidationError::OutOfRange {
            field: field.into(),
            min,
            max,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product: "Pote Chocolate 2L".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Pote Chocolate 2L: available 3, requested 5"
        );

        let err = CoreError::not_found("CashSession", "abc");
        assert_eq!(err.to_string(), "CashSession not found: abc");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            CoreError::conflict("CashSession", "terminal T1 already open").kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CoreError::invalid_state("CashSession", "s1", "not open").kind(),
            ErrorKind::InvalidState
        );
        let err: CoreError = ValidationError::required("items").into();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_validation_error_messages() {
        assert_eq!(ValidationError::required("payments").to_string(), "payments is required");
        assert_eq!(
            ValidationError::out_of_range("flavor_count", 1, 3).to_string(),
            "flavor_count must be between 1 and 3"
        );
    }
}
