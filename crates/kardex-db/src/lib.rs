//! # kardex-db: Ledger Persistence for Kardex
//!
//! Stock and cash ledgers, document numbering and ledger-backed documents
//! on top of SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kardex Data Flow                                 │
//! │                                                                         │
//! │  Caller (API layer, seed binary, tests)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     kardex-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │   Services     │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (repository/)  │   │  (embedded)  │  │   │
//! │  │   │               │    │                │   │              │  │   │
//! │  │   │ SqlitePool    │◄───│ DocumentSvc    │   │ 001_initial  │  │   │
//! │  │   │ LedgerSettings│    │ Stock / Cash   │   │              │  │   │
//! │  │   │               │    │ Sequences      │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  │          ▲                     │                               │   │
//! │  │   config.rs (TOML+env)   retry.rs (backoff)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  kardex-core: Money, totals, ledger replay, numbering formats          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration (defaults, TOML, environment)
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Storage and ledger error types
//! - [`retry`] - Bounded retry of conflicting transactions
//! - [`repository`] - Ledger and document services
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kardex_db::{Database, LedgerConfig};
//!
//! let config = LedgerConfig::load(None)?;
//! let db = Database::from_config(&config).await?;
//!
//! let receipt = db.documents().create_sales_receipt(&request, &user).await?;
//! let on_hand = db.stock().current_balance(&product_id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod retry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, LedgerConfig, LedgerSettings};
pub use error::{DbError, DbResult, ErrorCategory, LedgerError, LedgerResult};
pub use pool::{Database, DbConfig};
pub use retry::RetryPolicy;

// Service re-exports for convenience
pub use repository::cash::CashLedger;
pub use repository::catalog::CatalogRepository;
pub use repository::documents::DocumentService;
pub use repository::sequence::SequenceAllocator;
pub use repository::stock::StockLedger;

use tracing_subscriber::EnvFilter;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,kardex=debug,sqlx=warn";

/// Initializes the tracing subscriber for binaries.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=kardex_db=trace` - Trace this crate only
/// - Default: [`DEFAULT_LOG_FILTER`]
///
/// Calling it twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
