//! # Ledger Locks
//!
//! Per-subject exclusion for SQLite, which has no `SELECT ... FOR UPDATE`.
//!
//! ```text
//! BEGIN (deferred)
//!   INSERT INTO ledger_locks ... ON CONFLICT DO UPDATE   ◄── first statement
//!   │   takes the write lock now; a second writer waits here
//!   │   (busy_timeout) before it has read anything
//!   SELECT latest movement / max number
//!   INSERT movement / issue
//! COMMIT  ──► lock released
//! ```
//!
//! Because the claim is a write, the transaction never has to upgrade a
//! read snapshot that another writer may already have invalidated.

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::error::DbResult;

/// Lock key for a product's stock ledger.
pub fn stock_key(product_id: &str) -> String {
    format!("stock:{}", product_id)
}

/// Lock key for a cash register's ledger.
pub fn cash_key(register_id: &str) -> String {
    format!("cash:{}", register_id)
}

/// Lock key guarding the open-session check of a register name.
pub fn register_name_key(name: &str) -> String {
    format!("register:{}", name)
}

/// Lock key for a numbering scope.
pub fn sequence_key(scope_key: &str) -> String {
    format!("seq:{}", scope_key)
}

/// Lock key for a single document.
pub fn document_key(document: &str, id: &str) -> String {
    format!("document:{}:{}", document, id)
}

/// Claims `key` for the rest of the current transaction.
///
/// Must be the first statement of a transaction that reads before it
/// writes. Claiming further keys later in the same transaction is fine.
pub async fn claim(conn: &mut SqliteConnection, key: &str) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ledger_locks (lock_key, claimed_at)
        VALUES (?1, ?2)
        ON CONFLICT(lock_key) DO UPDATE SET claimed_at = excluded.claimed_at
        "#,
    )
    .bind(key)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}
