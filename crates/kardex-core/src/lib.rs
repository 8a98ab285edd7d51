//! # kardex-core: Pure Ledger Logic
//!
//! Everything about stock and cash ledgers, document totals and document
//! numbering that can be decided without storage.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Kardex Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            API layer (routing, auth, DTOs) - elsewhere          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          kardex-db: DocumentService, ledgers, allocator         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kardex-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌────────┐  │   │
//! │  │   │  money  │ │ totals  │ │ ledger  │ │ sequence │ │ types  │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └──────────┘ └────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (movements, registers, documents, requests)
//! - [`money`] - Integer-cents money with half-up tax rounding
//! - [`totals`] - Document totals calculator
//! - [`ledger`] - Balance transitions and log replay
//! - [`sequence`] - Sequence scopes and number formats
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use kardex_core::ledger::next_balance;
//! use kardex_core::types::Direction;
//!
//! let after = next_balance(10, Direction::Out, 4).unwrap();
//! assert_eq!(after, 6);
//! assert!(next_balance(after, Direction::Out, 7).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod money;
pub mod sequence;
pub mod totals;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError, ValidationResult};
pub use ledger::{next_balance, replay, BalanceError, LedgerAudit, LedgerBreak, LedgerEntry};
pub use money::Money;
pub use sequence::{DocumentNumber, DocumentType, SequenceFormat, SequenceScope};
pub use totals::{compute_document_totals, compute_totals, DocumentTotals, PricedLine};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Tax rate applied when none is configured: 18% IGV.
pub const DEFAULT_TAX_RATE_BPS: u32 = 1800;

/// Maximum number of lines on one document.
pub const MAX_DOCUMENT_LINES: usize = 200;

/// Maximum quantity on one line or one stock movement.
pub const MAX_LINE_QUANTITY: i64 = 1_000_000;
