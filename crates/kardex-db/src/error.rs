//! # Database Error Types
//!
//! Storage errors and the error every ledger operation returns.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  sqlx::Error ──► DbError ─────────────┐                                │
//! │                  (busy? constraint?)  │                                │
//! │                                       ▼                                │
//! │  CoreError ──────────────────────► LedgerError ──► category()          │
//! │  (insufficient stock, closed,        │              │                  │
//! │   not editable, corruption...)       │              ▼                  │
//! │                                      │      Rejected / Precondition /  │
//! │  retry exhausted ────────────────────┘      Validation / NotFound /    │
//! │  (ConcurrencyConflict)                      Integrity / Transient /    │
//! │                                             Internal                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use kardex_core::{CoreError, ValidationError};
use serde::Serialize;
use thiserror::Error;

/// SQLite primary result codes that mean "someone else holds the lock".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Duplicate SKU
    /// - Two appends racing for the same `(subject, ordinal)`
    /// - Two allocations racing for the same sequence value
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Constraint or trigger rejected the write (CHECK, append-only).
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// The database is locked by another writer and the busy timeout ran out.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether re-running the whole transaction may succeed.
    ///
    /// Lock contention is transient. So is a unique violation on one of the
    /// guard columns that serialize ledgers and numbering: it means another
    /// writer won the race for the same ordinal or number.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Busy(_) | DbError::PoolExhausted => true,
            DbError::UniqueViolation { field, .. } => is_guard_column(field),
            _ => false,
        }
    }
}

fn is_guard_column(field: &str) -> bool {
    field.contains(".ordinal")
        || field.starts_with("sequence_issues.")
        || field.contains("sales_receipts.number")
        || field.contains("purchase_orders.number")
}

fn is_busy(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    let code_says_busy = db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false);

    code_says_busy || db_err.message().contains("database is locked")
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Busy / Unique / FK / Constraint / QueryFailed
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                if is_busy(db_err.as_ref()) {
                    DbError::Busy(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed") || msg.contains("append-only") {
                    DbError::ConstraintViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Ledger Error
// =============================================================================

/// How the API layer should treat a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Business rule refused the request (400). Not retried.
    Rejected,
    /// Subject is in the wrong state (409/422). Not retried.
    Precondition,
    /// Malformed input or unknown reference (400).
    Validation,
    /// The document acted on does not exist (404).
    NotFound,
    /// Stored data violates an invariant (500). Needs an operator.
    Integrity,
    /// Lost a race after all retries (503). Safe to retry later.
    Transient,
    /// Anything else (500).
    Internal,
}

/// Error returned by every ledger, sequence and document operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Retries ran out while competing for the same subject or scope.
    #[error("Concurrency conflict in {operation} after {attempts} attempts")]
    ConcurrencyConflict { operation: String, attempts: u32 },

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::Domain(err) => match err {
                CoreError::InsufficientStock { .. } | CoreError::InsufficientBalance { .. } => {
                    ErrorCategory::Rejected
                }
                CoreError::RegisterClosed { .. } | CoreError::DocumentNotInEditableState { .. } => {
                    ErrorCategory::Precondition
                }
                CoreError::ReferencedEntityNotFound { .. } | CoreError::Validation(_) => {
                    ErrorCategory::Validation
                }
                CoreError::DocumentNotFound { .. } => ErrorCategory::NotFound,
                CoreError::SequenceCorruption { .. }
                | CoreError::SequenceExhausted { .. }
                | CoreError::LedgerInconsistent { .. } => ErrorCategory::Integrity,
            },
            LedgerError::ConcurrencyConflict { .. } => ErrorCategory::Transient,
            LedgerError::Storage(err) if err.is_transient() => ErrorCategory::Transient,
            LedgerError::Storage(DbError::ConstraintViolation { .. }) => ErrorCategory::Integrity,
            LedgerError::Storage(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the retry loop should run the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Storage(err) if err.is_transient())
    }

    /// The domain error, if this is one.
    pub fn as_domain(&self) -> Option<&CoreError> {
        match self {
            LedgerError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::Domain(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(DbError::from(err))
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// Unit Tests
// =============================================================================
