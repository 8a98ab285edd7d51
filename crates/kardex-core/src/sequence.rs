//! # Document Sequences
//!
//! Scopes, fixed-width formats and parsing for document numbers. The
//! allocation itself (locking, scanning issued numbers) lives in
//! `kardex-db`; this module only knows what a number looks like.
//!
//! ## Formats
//! ```text
//! ┌──────────────────┬──────────────────┬─────────────────────────────────┐
//! │ Scope key        │ Stored number    │ Printed                          │
//! ├──────────────────┼──────────────────┼─────────────────────────────────┤
//! │ SALE:F001        │ 00000001         │ F001-00000001                    │
//! │ SALE:B001        │ 00000001         │ B001-00000001  (own sequence)    │
//! │ PURCHASE_ORDER   │ OC-000001        │ OC-000001                        │
//! └──────────────────┴──────────────────┴─────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError, ValidationResult};
use crate::validation::validate_series;

const SALE_KEY: &str = "SALE";
const PURCHASE_ORDER_KEY: &str = "PURCHASE_ORDER";

/// Kind of numbered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Sale,
    PurchaseOrder,
}

/// A numbering domain: every scope has its own independent sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SequenceScope {
    pub document_type: DocumentType,
    /// Present for sales, absent for purchase orders.
    pub series: Option<String>,
}

impl SequenceScope {
    /// Scope of one sales series.
    pub fn sales(series: &str) -> ValidationResult<Self> {
        validate_series(series)?;
        Ok(SequenceScope {
            document_type: DocumentType::Sale,
            series: Some(series.to_string()),
        })
    }

    /// The single purchase order scope.
    pub fn purchase_orders() -> Self {
        SequenceScope {
            document_type: DocumentType::PurchaseOrder,
            series: None,
        }
    }

    /// Printable token identifying the scope, e.g. `SALE:F001`.
    pub fn key(&self) -> String {
        match (&self.document_type, &self.series) {
            (DocumentType::Sale, Some(series)) => format!("{}:{}", SALE_KEY, series),
            (DocumentType::Sale, None) => SALE_KEY.to_string(),
            (DocumentType::PurchaseOrder, _) => PURCHASE_ORDER_KEY.to_string(),
        }
    }

    /// Inverse of [`SequenceScope::key`].
    pub fn from_key(key: &str) -> ValidationResult<Self> {
        if key == PURCHASE_ORDER_KEY {
            return Ok(SequenceScope::purchase_orders());
        }

        match key.split_once(':') {
            Some((SALE_KEY, series)) => SequenceScope::sales(series),
            _ => Err(ValidationError::InvalidFormat {
                field: "scope".to_string(),
                reason: format!("unknown sequence scope '{}'", key),
            }),
        }
    }

    pub fn format(&self) -> SequenceFormat {
        match self.document_type {
            DocumentType::Sale => SequenceFormat::SALES,
            DocumentType::PurchaseOrder => SequenceFormat::PURCHASE_ORDERS,
        }
    }
}

impl fmt::Display for SequenceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// =============================================================================
// Format
// =============================================================================

/// Fixed-width rendering of a sequence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceFormat {
    pub prefix: &'static str,
    pub width: usize,
}

impl SequenceFormat {
    pub const SALES: SequenceFormat = SequenceFormat {
        prefix: "",
        width: 8,
    };

    pub const PURCHASE_ORDERS: SequenceFormat = SequenceFormat {
        prefix: "OC-",
        width: 6,
    };

    /// Largest value that still fits the width.
    pub fn max(&self) -> u64 {
        10u64.pow(self.width as u32) - 1
    }

    /// Renders `sequence` as stored text.
    ///
    /// ## Errors
    /// `SequenceExhausted` when the value no longer fits; numbers never wrap.
    pub fn render(&self, scope: &SequenceScope, sequence: u64) -> CoreResult<String> {
        if sequence == 0 || sequence > self.max() {
            return Err(CoreError::SequenceExhausted {
                scope: scope.key(),
                max: self.max(),
            });
        }
        Ok(format!("{}{:0width$}", self.prefix, sequence, width = self.width))
    }

    /// Parses stored text back into its sequence value.
    ///
    /// ## Errors
    /// `SequenceCorruption` for anything that is not the prefix followed by
    /// digits. Callers must not fall back to 1.
    pub fn parse(&self, scope: &SequenceScope, text: &str) -> CoreResult<u64> {
        let corrupt = || CoreError::SequenceCorruption {
            scope: scope.key(),
            value: text.to_string(),
        };

        let digits = text.strip_prefix(self.prefix).ok_or_else(corrupt)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(corrupt());
        }
        digits.parse::<u64>().map_err(|_| corrupt())
    }
}

// =============================================================================
// Document Number
// =============================================================================

/// A number issued by the sequence allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentNumber {
    pub scope: SequenceScope,
    pub sequence: u64,
    /// The stored form, e.g. `00000042` or `OC-000042`.
    pub formatted: String,
}

impl DocumentNumber {
    pub fn new(scope: SequenceScope, sequence: u64) -> CoreResult<Self> {
        let formatted = scope.format().render(&scope, sequence)?;
        Ok(DocumentNumber {
            scope,
            sequence,
            formatted,
        })
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope.series {
            Some(series) => write!(f, "{}-{}", series, self.formatted),
            None => f.write_str(&self.formatted),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_keys() {
        assert_eq!(SequenceScope::sales("F001").unwrap().key(), "SALE:F001");
        assert_eq!(SequenceScope::purchase_orders().key(), "PURCHASE_ORDER");
        assert!(SequenceScope::sales("bad series").is_err());
    }

    #[test]
    fn test_scope_key_round_trip() {
        let scope = SequenceScope::sales("B001").unwrap();
        assert_eq!(SequenceScope::from_key(&scope.key()).unwrap(), scope);
        assert_eq!(
            SequenceScope::from_key("PURCHASE_ORDER").unwrap(),
            SequenceScope::purchase_orders()
        );
        assert!(SequenceScope::from_key("INVOICE:X").is_err());
    }

    #[test]
    fn test_document_number_display() {
        let sale = DocumentNumber::new(SequenceScope::sales("F001").unwrap(), 1).unwrap();
        assert_eq!(sale.formatted, "00000001");
        assert_eq!(sale.to_string(), "F001-00000001");

        let po = DocumentNumber::new(SequenceScope::purchase_orders(), 42).unwrap();
        assert_eq!(po.formatted, "OC-000042");
        assert_eq!(po.to_string(), "OC-000042");
    }

    #[test]
    fn test_parse_stored_numbers() {
        let scope = SequenceScope::purchase_orders();
        let format = scope.format();
        assert_eq!(format.parse(&scope, "OC-000017").unwrap(), 17);
        assert!(matches!(
            format.parse(&scope, "OC-00A017"),
            Err(CoreError::SequenceCorruption { .. })
        ));
        assert!(format.parse(&scope, "000017").is_err());
        assert!(format.parse(&scope, "OC-").is_err());
    }

    #[test]
    fn test_exhausted_sequence_does_not_wrap() {
        let scope = SequenceScope::purchase_orders();
        assert!(DocumentNumber::new(scope.clone(), 999_999).is_ok());
        let err = DocumentNumber::new(scope, 1_000_000).unwrap_err();
        assert!(matches!(err, CoreError::SequenceExhausted { max: 999_999, .. }));
    }
}
