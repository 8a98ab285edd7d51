//! # Validation Module
//!
//! Input validation run before any ledger or sequence is touched.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Shapes and ranges (quantities, prices, series codes)              │
//! │  └── Fails fast, nothing allocated yet                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Ledger / document service (inside the transaction)           │
//! │  ├── Referenced entities exist                                         │
//! │  └── Balances stay non-negative                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints on quantities and balances                      │
//! │  ├── UNIQUE (subject, ordinal) and (series, number)                    │
//! │  └── Append-only triggers on movement tables                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kardex_core::validation::{validate_quantity, validate_series};
//!
//! validate_quantity(5).unwrap();
//! validate_series("F001").unwrap();
//! assert!(validate_series("f-01").is_err());
//! ```

use crate::error::{ValidationError, ValidationResult};
use crate::{MAX_DOCUMENT_LINES, MAX_LINE_QUANTITY};

/// Longest accepted identifier.
const MAX_ID_LEN: usize = 64;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU.
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, numbers, hyphens and underscores only
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a display name (product, supplier, client, register).
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates an entity identifier supplied by the caller.
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    Ok(())
}

/// Validates a sales series code.
///
/// ## Rules
/// - 1 to 4 characters
/// - Uppercase ASCII letters and digits only (`F001`, `B001`)
///
/// The series becomes part of the sequence scope key, so anything that
/// could collide with the `:` separator is rejected here.
pub fn validate_series(series: &str) -> ValidationResult<()> {
    if series.is_empty() {
        return Err(ValidationError::Required {
            field: "series".to_string(),
        });
    }

    if series.len() > 4 {
        return Err(ValidationError::TooLong {
            field: "series".to_string(),
            max: 4,
        });
    }

    if !series
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(ValidationError::InvalidFormat {
            field: "series".to_string(),
            reason: "must contain only uppercase letters and digits".to_string(),
        });
    }

    Ok(())
}

/// Validates a free-text movement concept or document note.
pub fn validate_note(field: &str, text: Option<&str>) -> ValidationResult<()> {
    match text {
        Some(text) if text.chars().count() > 500 => Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 500,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a movement or line quantity.
///
/// ## Rules
/// - Must be positive
/// - Must not exceed `MAX_LINE_QUANTITY`
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a unit price. Zero is allowed (free items).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price".to_string(),
        });
    }
    Ok(())
}

/// Validates a line or document discount.
pub fn validate_discount_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a cash movement amount.
pub fn validate_amount_cents(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

/// Validates an opening or counted register balance.
pub fn validate_balance_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a tax rate in basis points (at most 100%).
pub fn validate_tax_rate_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10000 {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: 10000,
        });
    }
    Ok(())
}

/// Validates the number of lines on a document.
pub fn validate_line_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }

    if count > MAX_DOCUMENT_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_DOCUMENT_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("ARZ-001").is_ok());
        assert!(validate_sku("").is_err());
        assert!(validate_sku("with space").is_err());
        assert!(validate_sku(&"A".repeat(51)).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "Arroz Costeño 5kg").is_ok());
        assert!(validate_name("name", "   ").is_err());
    }

    #[test]
    fn test_validate_series() {
        assert!(validate_series("F001").is_ok());
        assert!(validate_series("B1").is_ok());
        assert!(validate_series("").is_err());
        assert!(validate_series("F0001").is_err());
        assert!(validate_series("f001").is_err());
        assert!(validate_series("F:01").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());
        assert!(matches!(
            validate_quantity(0),
            Err(ValidationError::MustBePositive { .. })
        ));
        assert!(validate_quantity(-3).is_err());
        assert!(matches!(
            validate_quantity(MAX_LINE_QUANTITY + 1),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_money_inputs() {
        assert!(validate_price_cents(0).is_ok());
        assert!(validate_price_cents(-1).is_err());
        assert!(validate_discount_cents("discount", 0).is_ok());
        assert!(validate_discount_cents("discount", -5).is_err());
        assert!(validate_amount_cents(0).is_err());
        assert!(validate_amount_cents(1).is_ok());
        assert!(validate_balance_cents("opening_balance", 0).is_ok());
    }

    #[test]
    fn test_validate_tax_rate_bps() {
        assert!(validate_tax_rate_bps(1800).is_ok());
        assert!(validate_tax_rate_bps(10000).is_ok());
        assert!(validate_tax_rate_bps(10001).is_err());
    }

    #[test]
    fn test_validate_line_count() {
        assert!(validate_line_count(0).is_err());
        assert!(validate_line_count(1).is_ok());
        assert!(validate_line_count(MAX_DOCUMENT_LINES + 1).is_err());
    }

    #[test]
    fn test_validate_note() {
        assert!(validate_note("notes", None).is_ok());
        assert!(validate_note("notes", Some("ok")).is_ok());
        assert!(validate_note("notes", Some(&"x".repeat(501))).is_err());
    }
}
