//! # Error Types
//!
//! Domain errors raised by ledger, numbering and document rules.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kardex-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  kardex-db errors (separate crate)                                     │
//! │  ├── DbError          - Storage failures                               │
//! │  └── LedgerError      - What every ledger operation returns            │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LedgerError → API layer           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include the offending subject in the message (product, register, scope)
//! 3. Errors are enum variants, never String
//! 4. A rejected operation never leaves partial effects, so no variant
//!    carries "what was already written"

use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A document refers to a product, supplier, client or register that
    /// does not exist.
    ///
    /// ## When This Occurs
    /// - Sales line names an unknown `product_id`
    /// - Purchase order names an unknown `supplier_id`
    /// - A reception names a line that is not on the order
    #[error("{entity} referenced by '{field}' does not exist: {id}")]
    ReferencedEntityNotFound {
        entity: String,
        field: String,
        id: String,
    },

    /// The document being acted on does not exist.
    #[error("{document} not found: {id}")]
    DocumentNotFound { document: String, id: String },

    /// An outbound movement would drive stock below zero.
    ///
    /// ## User Workflow
    /// ```text
    /// Sales line (qty: 5)
    ///      │
    ///      ▼
    /// Ledger balance: available=3
    ///      │
    ///      ▼
    /// InsufficientStock { product_id, available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Whole receipt rolled back, no number consumed
    /// ```
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// A cash debit would drive the register balance below zero.
    #[error("Insufficient balance in register {register_id}: available {available}, requested {requested}")]
    InsufficientBalance {
        register_id: String,
        available: Money,
        requested: Money,
    },

    /// The cash register is closed and accepts no more movements.
    #[error("Cash register {register_id} is closed")]
    RegisterClosed { register_id: String },

    /// The document's status does not allow the requested transition.
    ///
    /// ## When This Occurs
    /// - Approving an order that is not `pending`
    /// - Receiving an order that was never approved
    /// - Voiding a receipt twice
    #[error("{document} {id} is {status}, cannot {operation}")]
    DocumentNotInEditableState {
        document: String,
        id: String,
        status: String,
        operation: String,
    },

    /// The highest issued number of a scope cannot be parsed.
    ///
    /// Numbering never restarts from 1 when this happens; someone has to
    /// look at the data.
    #[error("Sequence for scope {scope} is corrupt: cannot parse '{value}'")]
    SequenceCorruption { scope: String, value: String },

    /// The next number no longer fits the scope's fixed width.
    #[error("Sequence for scope {scope} is exhausted (max {max})")]
    SequenceExhausted { scope: String, max: u64 },

    /// Replaying a movement log found a broken chain.
    #[error("Ledger for {subject} is inconsistent: {reason}")]
    LedgerInconsistent { subject: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a ReferencedEntityNotFound error.
    pub fn missing_reference(
        entity: impl Into<String>,
        field: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        CoreError::ReferencedEntityNotFound {
            entity: entity.into(),
            field: field.into(),
            id: id.into(),
        }
    }

    /// Creates a DocumentNotFound error.
    pub fn document_not_found(document: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::DocumentNotFound {
            document: document.into(),
            id: id.into(),
        }
    }

    /// Creates a DocumentNotInEditableState error.
    pub fn not_editable(
        document: impl Into<String>,
        id: impl Into<String>,
        status: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        CoreError::DocumentNotInEditableState {
            document: document.into(),
            id: id.into(),
            status: status.into(),
            operation: operation.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any storage is touched.
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

    /// Invalid format (e.g., invalid UUID, bad series code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., the same line received twice).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// Arithmetic on the input would overflow.
    #[error("{field} is too large to compute")]
    Overflow { field: String },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

/// Convenience type alias for Results with ValidationError.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product_id: "p-1".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product p-1: available 3, requested 5"
        );

        let err = CoreError::InsufficientBalance {
            register_id: "r-1".to_string(),
            available: Money::from_cents(1000),
            requested: Money::from_cents(1500),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance in register r-1: available 10.00, requested 15.00"
        );
    }

    #[test]
    fn test_missing_reference_names_field() {
        let err = CoreError::missing_reference("Supplier", "supplier_id", "s-9");
        assert_eq!(
            err.to_string(),
            "Supplier referenced by 'supplier_id' does not exist: s-9"
        );
    }

    #[test]
    fn test_not_editable_message() {
        let err = CoreError::not_editable("PurchaseOrder", "po-1", "approved", "cancel");
        assert_eq!(err.to_string(), "PurchaseOrder po-1 is approved, cannot cancel");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "lines".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
