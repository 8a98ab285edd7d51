//! # Repository Module
//!
//! Ledger services and the row-level SQL behind them.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Database accessors                                                    │
//! │  db.documents() ─┬─► DocumentService                                   │
//! │                  │      │  one transaction per operation               │
//! │                  │      ├──► sequence::allocate   (scope lock)         │
//! │                  │      ├──► stock::append_in_tx  (product lock)       │
//! │                  │      ├──► cash::append_in_tx   (register lock)      │
//! │                  │      └──► sale / purchase      (rows)               │
//! │  db.stock()  ────┼─► StockLedger     ──► stock::append_in_tx           │
//! │  db.cash()   ────┼─► CashLedger      ──► cash::append_in_tx            │
//! │  db.sequences() ─┴─► SequenceAllocator ─► sequence::allocate           │
//! │                                                                         │
//! │  locks::claim() is the first statement of every write transaction.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Services
//!
//! - [`CatalogRepository`](catalog::CatalogRepository) - Products, suppliers, clients
//! - [`SequenceAllocator`](sequence::SequenceAllocator) - Document numbers
//! - [`StockLedger`](stock::StockLedger) - Stock movements and balances
//! - [`CashLedger`](cash::CashLedger) - Register sessions and cash movements
//! - [`DocumentService`](documents::DocumentService) - Sales receipts, purchase orders

pub mod cash;
pub mod catalog;
pub mod documents;
pub mod locks;
pub mod sequence;
pub mod stock;

mod purchase;
mod sale;
