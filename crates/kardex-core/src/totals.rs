//! # Document Totals
//!
//! Pure pricing of a document's lines: subtotal, tax and total.
//!
//! ## Formula
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  line_subtotal = max(0, quantity × unit_price − line_discount)         │
//! │  lines_total   = Σ line_subtotal                                        │
//! │  subtotal      = max(0, lines_total − document_discount)               │
//! │  tax           = round_half_up(subtotal × tax_rate, 2 decimals)        │
//! │  total         = subtotal + tax                                         │
//! │                                                                         │
//! │  Only `tax` is ever rounded. Everything else is exact integer cents.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```rust
//! use kardex_core::money::Money;
//! use kardex_core::totals::{compute_totals, PricedLine};
//! use kardex_core::types::TaxRate;
//!
//! let lines = [PricedLine::new(3, Money::from_cents(1000), Money::from_cents(500))];
//! let totals = compute_totals(&lines, Money::zero(), TaxRate::from_bps(1800)).unwrap();
//!
//! assert_eq!(totals.subtotal.cents(), 2500);
//! assert_eq!(totals.tax.cents(), 450);
//! assert_eq!(totals.total.cents(), 2950);
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{ValidationError, ValidationResult};
use crate::money::Money;
use crate::types::{DocumentLineInput, TaxRate};
use crate::validation::{
    validate_discount_cents, validate_line_count, validate_price_cents, validate_quantity,
    validate_tax_rate_bps,
};

/// A line reduced to what pricing needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
}

impl PricedLine {
    pub fn new(quantity: i64, unit_price: Money, discount: Money) -> Self {
        PricedLine {
            quantity,
            unit_price,
            discount,
        }
    }
}

impl From<&DocumentLineInput> for PricedLine {
    fn from(line: &DocumentLineInput) -> Self {
        PricedLine {
            quantity: line.quantity,
            unit_price: Money::from_cents(line.unit_price_cents),
            discount: Money::from_cents(line.discount_cents),
        }
    }
}

/// Result of pricing a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentTotals {
    /// Per-line subtotals, in input order, already clamped at zero.
    pub line_subtotals: Vec<Money>,
    pub lines_total: Money,
    /// Document discount actually applied (never more than `lines_total`).
    pub discount: Money,
    pub subtotal: Money,
    pub tax_rate: TaxRate,
    pub tax: Money,
    pub total: Money,
}

/// Prices `lines` with a document-level discount and a single tax rate.
///
/// ## Errors
/// - `Required` / `OutOfRange` on the line count
/// - `MustBePositive` / `OutOfRange` on a quantity
/// - `MustNotBeNegative` on a price or discount
/// - `Overflow` if the amounts do not fit in cents
pub fn compute_totals(
    lines: &[PricedLine],
    document_discount: Money,
    tax_rate: TaxRate,
) -> ValidationResult<DocumentTotals> {
    validate_line_count(lines.len())?;
    validate_discount_cents("discount", document_discount.cents())?;
    validate_tax_rate_bps(tax_rate.bps())?;

    let mut line_subtotals = Vec::with_capacity(lines.len());
    let mut lines_total = Money::zero();

    for line in lines {
        validate_quantity(line.quantity)?;
        validate_price_cents(line.unit_price.cents())?;
        validate_discount_cents("line_discount", line.discount.cents())?;

        let gross = line
            .unit_price
            .checked_mul_quantity(line.quantity)
            .ok_or_else(|| overflow("line_subtotal"))?;
        let net = gross
            .checked_sub(line.discount)
            .ok_or_else(|| overflow("line_subtotal"))?
            .clamp_zero();

        lines_total = lines_total
            .checked_add(net)
            .ok_or_else(|| overflow("lines_total"))?;
        line_subtotals.push(net);
    }

    let discount = document_discount.min(lines_total);
    let subtotal = lines_total - discount;
    let tax = subtotal.calculate_tax(tax_rate);
    let total = subtotal
        .checked_add(tax)
        .ok_or_else(|| overflow("total"))?;

    Ok(DocumentTotals {
        line_subtotals,
        lines_total,
        discount,
        subtotal,
        tax_rate,
        tax,
        total,
    })
}

/// Convenience wrapper over request lines.
pub fn compute_document_totals(
    lines: &[DocumentLineInput],
    document_discount_cents: i64,
    tax_rate: TaxRate,
) -> ValidationResult<DocumentTotals> {
    let priced: Vec<PricedLine> = lines.iter().map(PricedLine::from).collect();
    compute_totals(&priced, Money::from_cents(document_discount_cents), tax_rate)
}

fn overflow(field: &str) -> ValidationError {
    ValidationError::Overflow {
        field: field.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
