//! # Validation Module
//!
//! Input validation for the settlement, cash-session and back-office flows.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP request validators (external)                           │
//! │  ├── Shape and type checks                                             │
//! │  └── Immediate feedback                                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engine entry points                                          │
//! │  └── THIS MODULE: range and format rules, before any store access      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE constraints (coupon code, one open session per terminal)   │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use sorveteria_core::validation::{normalize_coupon_code, validate_quantity};
//!
//! validate_quantity(5).unwrap();
//! assert_eq!(normalize_coupon_code(" verao10 ").unwrap(), "VERAO10");
//! ```

use crate::error::ValidationError;
use crate::{MAX_ITEM_QUANTITY, MAX_ITEM_WEIGHT_GRAMS, MAX_ORDER_ITEMS, MAX_PAYMENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a required free-text field and returns it trimmed.
///
/// ## Example
/// ```rust
/// use sorveteria_core::validation::validate_text;
///
/// assert_eq!(validate_text("table_label", " Mesa 4 ", 40).unwrap(), "Mesa 4");
/// assert!(validate_text("table_label", "  ", 40).is_err());
/// ```
pub fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(value.to_string())
}

/// Validates a terminal identifier.
///
/// ## Rules
/// - 1 to 32 characters
/// - Letters, numbers, hyphens and underscores only
pub fn validate_terminal_id(terminal_id: &str) -> ValidationResult<String> {
    let terminal_id = validate_text("terminal_id", terminal_id, 32)?;

    if !terminal_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "terminal_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(terminal_id)
}

/// Normalizes a coupon code to its stored form (trimmed, upper-case).
///
/// ## Rules
/// - 3 to 30 characters
/// - Letters, numbers, hyphens and underscores only
pub fn normalize_coupon_code(code: &str) -> ValidationResult<String> {
    let code = code.trim().to_uppercase();

    if code.is_empty() {
        return Err(ValidationError::required("coupon_code"));
    }

    if code.len() < 3 || code.len() > 30 {
        return Err(ValidationError::out_of_range("coupon_code length", 3, 30));
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "coupon_code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(code)
}

/// Validates a CPF (11 digits, punctuation ignored) and returns the digits.
pub fn normalize_cpf(cpf: &str) -> ValidationResult<String> {
    let digits: String = cpf.chars().filter(|c| c.is_ascii_digit()).collect();
    let has_garbage = cpf
        .chars()
        .any(|c| !(c.is_ascii_digit() || c == '.' || c == '-' || c.is_whitespace()));

    if digits.len() != 11 || has_garbage {
        return Err(ValidationError::InvalidFormat {
            field: "cpf".to_string(),
            reason: "must have 11 digits".to_string(),
        });
    }

    Ok(digits)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a unit quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::out_of_range("quantity", 1, MAX_ITEM_QUANTITY));
    }

    Ok(())
}

/// Validates a weight read from the scale, in grams.
pub fn validate_weight_grams(grams: i64) -> ValidationResult<()> {
    if grams <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "weight_grams".to_string(),
        });
    }

    if grams > MAX_ITEM_WEIGHT_GRAMS {
        return Err(ValidationError::out_of_range(
            "weight_grams",
            1,
            MAX_ITEM_WEIGHT_GRAMS,
        ));
    }

    Ok(())
}

/// Validates the flavor count of an assembled cup against its size.
///
/// ## User Workflow
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Counter: Montado cup, size "G" (max_flavors = 3)                       │
/// │                                                                         │
/// │  Operator picks 4 flavors                                              │
/// │       │                                                                 │
/// │       ▼                                                                 │
/// │  validate_flavor_count(4, 3) ← THIS FUNCTION                           │
/// │       │                                                                 │
/// │       └── Error: "flavor_count must be between 1 and 3"                │
/// │           (nothing priced, nothing written)                            │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn validate_flavor_count(count: i64, max_flavors: i64) -> ValidationResult<()> {
    if count < 1 || count > max_flavors {
        return Err(ValidationError::out_of_range("flavor_count", 1, max_flavors.max(1)));
    }

    Ok(())
}

/// Validates an amount that may be zero but never negative (float, fees, discounts).
///
/// ## Example
/// ```rust
/// use sorveteria_core::validation::validate_non_negative_cents;
///
/// assert!(validate_non_negative_cents("initial_cash", 0).is_ok());
/// assert!(validate_non_negative_cents("initial_cash", -1).is_err());
/// ```
pub fn validate_non_negative_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates an amount that must be strictly positive.
pub fn validate_positive_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a rate in basis points.
///
/// ## Rules
/// - At most `max_bps` (10000 = 100% for fees and percentages)
pub fn validate_rate_bps(field: &str, bps: i64, max_bps: i64) -> ValidationResult<()> {
    if bps < 0 || bps > max_bps {
        return Err(ValidationError::out_of_range(field, 0, max_bps));
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates the number of lines on a settlement.
///
/// ## Rules
/// - At least one line
/// - At most MAX_ORDER_ITEMS (100)
pub fn validate_item_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::required("items"));
    }

    if count > MAX_ORDER_ITEMS {
        return Err(ValidationError::out_of_range("items", 1, MAX_ORDER_ITEMS as i64));
    }

    Ok(())
}

/// Validates the number of payment rows on a settlement.
///
/// ## Rules
/// - At least one payment
/// - At most MAX_PAYMENTS (10)
pub fn validate_payment_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::required("payments"));
    }

    if count > MAX_PAYMENTS {
        return Err(ValidationError::out_of_range("payments", 1, MAX_PAYMENTS as i64));
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string.
///
/// ## Example
/// ```rust
/// use sorveteria_core::validation::validate_uuid;
///
/// assert!(validate_uuid("product_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("product_id", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::required(field));
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_terminal_id() {
        assert_eq!(validate_terminal_id(" T1 ").unwrap(), "T1");
        assert!(validate_terminal_id("caixa-02").is_ok());

        assert!(validate_terminal_id("").is_err());
        assert!(validate_terminal_id("caixa 02").is_err());
        assert!(validate_terminal_id(&"T".repeat(33)).is_err());
    }

    #[test]
    fn test_normalize_coupon_code() {
        assert_eq!(normalize_coupon_code("verao10").unwrap(), "VERAO10");
        assert!(normalize_coupon_code("ab").is_err());
        assert!(normalize_coupon_code("TEN OFF").is_err());
    }

    #[test]
    fn test_normalize_cpf() {
        assert_eq!(normalize_cpf("123.456.789-09").unwrap(), "12345678909");
        assert!(normalize_cpf("123").is_err());
        assert!(normalize_cpf("123.456.789-0a").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_weight_grams() {
        assert!(validate_weight_grams(350).is_ok());
        assert!(validate_weight_grams(0).is_err());
        assert!(validate_weight_grams(MAX_ITEM_WEIGHT_GRAMS + 1).is_err());
    }

    #[test]
    fn test_validate_flavor_count() {
        assert!(validate_flavor_count(1, 3).is_ok());
        assert!(validate_flavor_count(3, 3).is_ok());

        let err = validate_flavor_count(4, 3).unwrap_err();
        assert_eq!(err.to_string(), "flavor_count must be between 1 and 3");
        assert!(validate_flavor_count(0, 3).is_err());
    }

    #[test]
    fn test_collection_sizes() {
        assert!(validate_item_count(0).is_err());
        assert!(validate_item_count(1).is_ok());
        assert!(validate_item_count(MAX_ORDER_ITEMS + 1).is_err());

        assert!(validate_payment_count(0).is_err());
        assert!(validate_payment_count(2).is_ok());
    }

    #[test]
    fn test_validate_rate_bps() {
        assert!(validate_rate_bps("fee", 0, 10_000).is_ok());
        assert!(validate_rate_bps("fee", 199, 10_000).is_ok());
        assert!(validate_rate_bps("fee", 10_001, 10_000).is_err());
        assert!(validate_rate_bps("fee", -1, 10_000).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("id", "").is_err());
        assert!(validate_uuid("id", "123").is_err());
    }
}
