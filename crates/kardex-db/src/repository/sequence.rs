//! # Sequence Allocator
//!
//! Issues document numbers: gap-free, never repeated, per scope.
//!
//! ## Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  claim lock "seq:SALE:F001"          (serializes the scope)            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  max( highest number on stored documents,                              │
//! │       highest sequence in sequence_issues )                            │
//! │       │        unparsable text ──► SequenceCorruption (never restart)  │
//! │       ▼                                                                 │
//! │  render(max + 1)                      no room ──► SequenceExhausted    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT sequence_issues                PK(scope, sequence) backstop    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! When called from a document operation the issue row shares the
//! document's transaction, so a rolled back document gives its number back.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbResult, LedgerResult};
use crate::repository::locks;
use crate::retry::RetryPolicy;
use kardex_core::{CoreError, DocumentNumber, DocumentType, SequenceScope};

/// Allocates and previews document numbers.
#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl SequenceAllocator {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        SequenceAllocator { pool, retry }
    }

    /// Reserves the next number of `scope` in its own transaction.
    ///
    /// The number is consumed even if no document ever carries it.
    pub async fn next(&self, scope: &SequenceScope) -> LedgerResult<DocumentNumber> {
        self.retry
            .run("sequence.next", || self.next_once(scope))
            .await
    }

    async fn next_once(&self, scope: &SequenceScope) -> LedgerResult<DocumentNumber> {
        let mut tx = self.pool.begin().await?;
        let number = allocate(&mut *tx, scope, None).await?;
        tx.commit().await?;

        info!(scope = %scope, number = %number, "Sequence number issued");
        Ok(number)
    }

    /// The number `next` would return right now. Reserves nothing.
    pub async fn peek(&self, scope: &SequenceScope) -> LedgerResult<DocumentNumber> {
        let mut conn = self.pool.acquire().await?;
        let highest = highest_issued(&mut conn, scope).await?;
        Ok(DocumentNumber::new(scope.clone(), successor(scope, highest)?)?)
    }
}

/// Allocates inside the caller's transaction.
///
/// Claims the scope lock first, so callers that read before writing should
/// call this before anything else.
pub(crate) async fn allocate(
    conn: &mut SqliteConnection,
    scope: &SequenceScope,
    document_id: Option<&str>,
) -> LedgerResult<DocumentNumber> {
    let key = scope.key();
    locks::claim(conn, &locks::sequence_key(&key)).await?;

    let highest = highest_issued(conn, scope).await?;
    let number = DocumentNumber::new(scope.clone(), successor(scope, highest)?)?;

    sqlx::query(
        r#"
        INSERT INTO sequence_issues (scope_key, sequence, number, document_id, issued_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(&key)
    .bind(number.sequence as i64)
    .bind(&number.formatted)
    .bind(document_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    debug!(scope = %key, sequence = number.sequence, "Sequence reserved");
    Ok(number)
}

/// The sequence after `highest`. Imported data can sit at `u64::MAX`.
fn successor(scope: &SequenceScope, highest: u64) -> LedgerResult<u64> {
    highest.checked_add(1).ok_or_else(|| {
        CoreError::SequenceExhausted {
            scope: scope.key(),
            max: scope.format().max(),
        }
        .into()
    })
}

/// Highest sequence value already used by `scope`, 0 if none.
async fn highest_issued(conn: &mut SqliteConnection, scope: &SequenceScope) -> LedgerResult<u64> {
    let format = scope.format();

    let on_documents = match highest_document_number(conn, scope).await? {
        Some(text) => format.parse(scope, &text)?,
        None => 0,
    };

    let on_issues: Option<i64> =
        sqlx::query_scalar("SELECT MAX(sequence) FROM sequence_issues WHERE scope_key = ?1")
            .bind(scope.key())
            .fetch_one(&mut *conn)
            .await?;

    Ok(on_documents.max(on_issues.unwrap_or(0).max(0) as u64))
}

/// Highest stored number text of the scope's documents.
///
/// Ordered by length first so `100000000` (overflowed by hand) still sorts
/// above `99999999` and gets reported instead of ignored.
async fn highest_document_number(
    conn: &mut SqliteConnection,
    scope: &SequenceScope,
) -> DbResult<Option<String>> {
    let number: Option<String> = match (&scope.document_type, &scope.series) {
        (DocumentType::Sale, series) => {
            sqlx::query_scalar(
                r#"
                SELECT number FROM sales_receipts
                WHERE series = ?1
                ORDER BY LENGTH(number) DESC, number DESC
                LIMIT 1
                "#,
            )
            .bind(series.as_deref().unwrap_or_default())
            .fetch_optional(&mut *conn)
            .await?
        }
        (DocumentType::PurchaseOrder, _) => {
            sqlx::query_scalar(
                r#"
                SELECT number FROM purchase_orders
                ORDER BY LENGTH(number) DESC, number DESC
                LIMIT 1
                "#,
            )
            .fetch_optional(&mut *conn)
            .await?
        }
    };

    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::pool::{remove_database_files, Database, DbConfig};
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_first_numbers_per_scope() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sequences = db.sequences();

        let f001 = SequenceScope::sales("F001").unwrap();
        let b001 = SequenceScope::sales("B001").unwrap();
        let orders = SequenceScope::purchase_orders();

        assert_eq!(sequences.next(&f001).await.unwrap().formatted, "00000001");
        assert_eq!(sequences.next(&f001).await.unwrap().formatted, "00000002");
        assert_eq!(sequences.next(&b001).await.unwrap().formatted, "00000001");
        assert_eq!(sequences.next(&orders).await.unwrap().formatted, "OC-000001");
    }

    #[tokio::test]
    async fn test_peek_reserves_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sequences = db.sequences();
        let scope = SequenceScope::sales("F001").unwrap();

        assert_eq!(sequences.peek(&scope).await.unwrap().sequence, 1);
        assert_eq!(sequences.peek(&scope).await.unwrap().sequence, 1);
        assert_eq!(sequences.next(&scope).await.unwrap().sequence, 1);
        assert_eq!(sequences.peek(&scope).await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_continues_after_imported_documents() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let supplier = db.catalog().create_supplier("Acme", None).await.unwrap();
        let now = Utc::now();

        // Orders created by an earlier system, never recorded in sequence_issues.
        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, number, supplier_id, status, lines_total_cents, discount_cents,
                subtotal_cents, tax_rate_bps, tax_cents, total_cents,
                created_by, created_at, updated_at
            ) VALUES ('legacy-1', 'OC-000041', ?1, 'received', 0, 0, 0, 1800, 0, 0, 'import', ?2, ?2)
            "#,
        )
        .bind(&supplier.id)
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();

        let number = db
            .sequences()
            .next(&SequenceScope::purchase_orders())
            .await
            .unwrap();
        assert_eq!(number.formatted, "OC-000042");
    }

    #[tokio::test]
    async fn test_corrupt_number_is_reported() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let client = db.catalog().create_client("Walk-in", None).await.unwrap();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sales_receipts (
                id, series, number, client_id, status, lines_total_cents, discount_cents,
                subtotal_cents, tax_rate_bps, tax_cents, total_cents, created_by, created_at
            ) VALUES ('bad-1', 'F001', 'ABC', ?1, 'active', 0, 0, 0, 1800, 0, 0, 'import', ?2)
            "#,
        )
        .bind(&client.id)
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();

        let scope = SequenceScope::sales("F001").unwrap();
        let err = db.sequences().next(&scope).await.unwrap_err();
        match err {
            LedgerError::Domain(CoreError::SequenceCorruption { scope, value }) => {
                assert_eq!(scope, "SALE:F001");
                assert_eq!(value, "ABC");
            }
            other => panic!("expected corruption, got {:?}", other),
        }

        // Other series are unaffected.
        let other = SequenceScope::sales("F002").unwrap();
        assert_eq!(db.sequences().next(&other).await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_exhausted_scope() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        sqlx::query(
            r#"
            INSERT INTO sequence_issues (scope_key, sequence, number, document_id, issued_at)
            VALUES ('PURCHASE_ORDER', 999999, 'OC-999999', NULL, ?1)
            "#,
        )
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();

        let err = db
            .sequences()
            .next(&SequenceScope::purchase_orders())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(CoreError::SequenceExhausted { max: 999_999, .. })
        ));
    }

    #[tokio::test]
    async fn test_imported_number_at_u64_max_is_exhausted() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let supplier = db.catalog().create_supplier("Acme", None).await.unwrap();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, number, supplier_id, status, lines_total_cents, discount_cents,
                subtotal_cents, tax_rate_bps, tax_cents, total_cents,
                created_by, created_at, updated_at
            ) VALUES ('legacy-max', 'OC-18446744073709551615', ?1, 'received', 0, 0, 0, 1800, 0, 0, 'import', ?2, ?2)
            "#,
        )
        .bind(&supplier.id)
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();

        let scope = SequenceScope::purchase_orders();
        let err = db.sequences().next(&scope).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(CoreError::SequenceExhausted { max: 999_999, .. })
        ));

        let err = db.sequences().peek(&scope).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(CoreError::SequenceExhausted { .. })
        ));

        let issued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sequence_issues")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(issued, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_next_is_gap_free() {
        let path = std::env::temp_dir().join(format!("kardex-seq-{}.db", uuid::Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(8))
            .await
            .unwrap();
        let scope = SequenceScope::sales("F001").unwrap();

        let mut handles = Vec::new();
        for _ in 0..40 {
            let sequences = db.sequences();
            let scope = scope.clone();
            handles.push(tokio::spawn(async move { sequences.next(&scope).await }));
        }

        let mut issued = HashSet::new();
        for handle in handles {
            let number = handle.await.unwrap().unwrap();
            assert!(issued.insert(number.sequence), "duplicate {}", number);
        }

        let expected: HashSet<u64> = (1..=40).collect();
        assert_eq!(issued, expected);

        db.close().await;
        remove_database_files(&path);
    }
}
