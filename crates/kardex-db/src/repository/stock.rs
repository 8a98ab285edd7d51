//! # Stock Ledger
//!
//! Append-only movement log per product. The balance of a product is the
//! `balance_after` of its latest movement; `products.current_stock` is a
//! cache rewritten in the same transaction as every append.
//!
//! ## Append
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  claim "stock:<product>"                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  latest movement ──► before = balance_after (0 if none)                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  next_balance(before, direction, qty)                                  │
//! │       │   out > before ──► InsufficientStock, nothing written          │
//! │       ▼                                                                 │
//! │  INSERT movement (ordinal + 1)   UNIQUE(product_id, ordinal) backstop  │
//! │  UPDATE products.current_stock                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbResult, LedgerError, LedgerResult};
use crate::repository::{catalog, locks};
use crate::retry::RetryPolicy;
use kardex_core::validation::{validate_id, validate_note, validate_quantity};
use kardex_core::{
    next_balance, replay, BalanceError, CoreError, Direction, LedgerAudit, MovementReference,
    Product, ReferenceType, StockChange, StockMovement, StockMovementKind, UserRef,
    ValidationError,
};

const MOVEMENT_COLUMNS: &str = r#"
    id, product_id, ordinal, kind, direction, quantity,
    balance_before, balance_after, reference_type, reference_id,
    concept, user_id, occurred_at
"#;

/// A movement about to be appended.
#[derive(Debug, Clone)]
pub(crate) struct StockEntry<'a> {
    pub product_id: &'a str,
    pub kind: StockMovementKind,
    pub direction: Direction,
    pub quantity: i64,
    pub reference: Option<&'a MovementReference>,
    pub concept: Option<&'a str>,
    pub user: &'a UserRef,
}

/// The stock ledger.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl StockLedger {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        StockLedger { pool, retry }
    }

    /// Appends a manual movement (reception outside a document, count
    /// adjustment, shrinkage).
    ///
    /// ## Errors
    /// - `ReferencedEntityNotFound` if the product does not exist
    /// - `InsufficientStock` if an outbound change exceeds the balance
    pub async fn append(
        &self,
        product_id: &str,
        change: StockChange,
        quantity: i64,
        concept: Option<&str>,
        user: &UserRef,
    ) -> LedgerResult<StockMovement> {
        let entry = StockEntry {
            product_id,
            kind: change.kind(),
            direction: change.direction(),
            quantity,
            reference: None,
            concept,
            user,
        };

        self.retry
            .run("stock.append", || self.append_once(&entry))
            .await
    }

    async fn append_once(&self, entry: &StockEntry<'_>) -> LedgerResult<StockMovement> {
        let mut tx = self.pool.begin().await?;
        let movement = append_in_tx(&mut *tx, entry).await?;
        tx.commit().await?;
        Ok(movement)
    }

    /// Moves `quantity` units from one product to another.
    ///
    /// Both movements share a transfer reference and commit together.
    pub async fn transfer(
        &self,
        from_product_id: &str,
        to_product_id: &str,
        quantity: i64,
        concept: Option<&str>,
        user: &UserRef,
    ) -> LedgerResult<(StockMovement, StockMovement)> {
        if from_product_id == to_product_id {
            return Err(ValidationError::InvalidFormat {
                field: "to_product_id".to_string(),
                reason: "must differ from the source product".to_string(),
            }
            .into());
        }

        let reference = MovementReference::new(ReferenceType::Transfer, Uuid::new_v4().to_string());

        self.retry
            .run("stock.transfer", || {
                self.transfer_once(from_product_id, to_product_id, quantity, concept, user, &reference)
            })
            .await
    }

    async fn transfer_once(
        &self,
        from_product_id: &str,
        to_product_id: &str,
        quantity: i64,
        concept: Option<&str>,
        user: &UserRef,
        reference: &MovementReference,
    ) -> LedgerResult<(StockMovement, StockMovement)> {
        let mut tx = self.pool.begin().await?;

        let outbound = append_in_tx(
            &mut *tx,
            &StockEntry {
                product_id: from_product_id,
                kind: StockMovementKind::Transfer,
                direction: Direction::Out,
                quantity,
                reference: Some(reference),
                concept,
                user,
            },
        )
        .await?;

        let inbound = append_in_tx(
            &mut *tx,
            &StockEntry {
                product_id: to_product_id,
                kind: StockMovementKind::Transfer,
                direction: Direction::In,
                quantity,
                reference: Some(reference),
                concept,
                user,
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            from = %from_product_id,
            to = %to_product_id,
            quantity,
            transfer_id = %reference.reference_id,
            "Stock transferred"
        );
        Ok((outbound, inbound))
    }

    /// Balance after the latest movement, 0 for a product with no history.
    pub async fn current_balance(&self, product_id: &str) -> LedgerResult<i64> {
        let mut conn = self.pool.acquire().await?;
        ensure_product(&mut conn, product_id).await?;

        let latest = latest_movement(&mut conn, product_id).await?;
        Ok(latest.map(|m| m.balance_after).unwrap_or(0))
    }

    /// Balance as of `at`, re-derived from the log.
    pub async fn balance_as_of(&self, product_id: &str, at: DateTime<Utc>) -> LedgerResult<i64> {
        let mut conn = self.pool.acquire().await?;
        ensure_product(&mut conn, product_id).await?;

        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            "SELECT {} FROM stock_movements WHERE product_id = ?1 AND occurred_at <= ?2 ORDER BY ordinal",
            MOVEMENT_COLUMNS
        ))
        .bind(product_id)
        .bind(at)
        .fetch_all(&mut *conn)
        .await?;

        replay(0, &movements).map_err(|brk| {
            LedgerError::from(CoreError::LedgerInconsistent {
                subject: format!("product {}", product_id),
                reason: format!("ordinal {}: {}", brk.ordinal, brk.reason),
            })
        })
    }

    /// Movements in ordinal order, optionally bounded by time (inclusive).
    pub async fn history(
        &self,
        product_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<StockMovement>> {
        validate_id("product_id", product_id)?;

        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            r#"
            SELECT {} FROM stock_movements
            WHERE product_id = ?1
              AND (?2 IS NULL OR occurred_at >= ?2)
              AND (?3 IS NULL OR occurred_at <= ?3)
            ORDER BY ordinal
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(product_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    pub async fn latest(&self, product_id: &str) -> LedgerResult<Option<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        Ok(latest_movement(&mut conn, product_id).await?)
    }

    /// Replays the whole log and compares it with the cached stock.
    pub async fn audit(&self, product_id: &str) -> LedgerResult<LedgerAudit> {
        let mut conn = self.pool.acquire().await?;
        let product = ensure_product(&mut conn, product_id).await?;
        let movements = all_movements(&mut conn, product_id).await?;

        let audit = LedgerAudit::from_replay(product_id, 0, &movements, product.current_stock);
        if !audit.is_consistent() {
            warn!(product_id = %product_id, ?audit, "Stock ledger audit failed");
        }
        Ok(audit)
    }

    /// Recomputes `products.current_stock` from the log.
    ///
    /// Refuses to touch the cache when the log itself is broken.
    pub async fn rebuild_balance(&self, product_id: &str) -> LedgerResult<i64> {
        self.retry
            .run("stock.rebuild_balance", || self.rebuild_once(product_id))
            .await
    }

    async fn rebuild_once(&self, product_id: &str) -> LedgerResult<i64> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::stock_key(product_id)).await?;

        let product = ensure_product(&mut *tx, product_id).await?;
        let movements = all_movements(&mut *tx, product_id).await?;
        let balance = replay(0, &movements).map_err(|brk| CoreError::LedgerInconsistent {
            subject: format!("product {}", product_id),
            reason: format!("ordinal {}: {}", brk.ordinal, brk.reason),
        })?;

        if balance != product.current_stock {
            warn!(
                product_id = %product_id,
                cached = product.current_stock,
                replayed = balance,
                "Rewriting drifted stock cache"
            );
            set_cached_stock(&mut *tx, product_id, balance).await?;
        }

        tx.commit().await?;
        Ok(balance)
    }
}

// =============================================================================
// Transaction-level helpers
// =============================================================================

/// Appends one movement inside the caller's transaction.
pub(crate) async fn append_in_tx(
    conn: &mut SqliteConnection,
    entry: &StockEntry<'_>,
) -> LedgerResult<StockMovement> {
    validate_quantity(entry.quantity)?;
    validate_note("concept", entry.concept)?;

    locks::claim(conn, &locks::stock_key(entry.product_id)).await?;

    let product = ensure_product(conn, entry.product_id).await?;
    let latest = latest_movement(conn, entry.product_id).await?;
    let before = latest.as_ref().map(|m| m.balance_after).unwrap_or(0);

    if product.current_stock != before {
        warn!(
            product_id = %entry.product_id,
            cached = product.current_stock,
            ledger = before,
            "Stock cache drifted from ledger, ledger wins"
        );
    }

    let after = next_balance(before, entry.direction, entry.quantity)
        .map_err(|e| balance_error(entry.product_id, e))?;

    let now = Utc::now();
    let movement = StockMovement {
        id: Uuid::new_v4().to_string(),
        product_id: entry.product_id.to_string(),
        ordinal: latest.as_ref().map(|m| m.ordinal + 1).unwrap_or(1),
        kind: entry.kind,
        direction: entry.direction,
        quantity: entry.quantity,
        balance_before: before,
        balance_after: after,
        reference_type: entry.reference.map(|r| r.reference_type),
        reference_id: entry.reference.map(|r| r.reference_id.clone()),
        concept: entry.concept.map(str::to_string),
        user_id: entry.user.id.clone(),
        // Never earlier than the previous movement, even if the clock steps back.
        occurred_at: latest.map(|m| m.occurred_at.max(now)).unwrap_or(now),
    };

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, product_id, ordinal, kind, direction, quantity,
            balance_before, balance_after, reference_type, reference_id,
            concept, user_id, occurred_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.product_id)
    .bind(movement.ordinal)
    .bind(movement.kind)
    .bind(movement.direction)
    .bind(movement.quantity)
    .bind(movement.balance_before)
    .bind(movement.balance_after)
    .bind(movement.reference_type)
    .bind(&movement.reference_id)
    .bind(&movement.concept)
    .bind(&movement.user_id)
    .bind(movement.occurred_at)
    .execute(&mut *conn)
    .await?;

    set_cached_stock(conn, entry.product_id, after).await?;

    debug!(
        product_id = %movement.product_id,
        ordinal = movement.ordinal,
        kind = movement.kind.as_str(),
        quantity = movement.quantity,
        balance_after = movement.balance_after,
        "Stock movement appended"
    );

    Ok(movement)
}

fn balance_error(product_id: &str, err: BalanceError) -> LedgerError {
    match err {
        BalanceError::Insufficient {
            available,
            requested,
        } => CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            available,
            requested,
        }
        .into(),
        BalanceError::NonPositive(_) => ValidationError::MustBePositive {
            field: "quantity".to_string(),
        }
        .into(),
        BalanceError::Overflow => ValidationError::Overflow {
            field: "quantity".to_string(),
        }
        .into(),
    }
}

async fn ensure_product(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> LedgerResult<Product> {
    validate_id("product_id", product_id)?;
    catalog::fetch_product(conn, product_id)
        .await?
        .ok_or_else(|| CoreError::missing_reference("Product", "product_id", product_id).into())
}

async fn latest_movement(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> DbResult<Option<StockMovement>> {
    let movement = sqlx::query_as::<_, StockMovement>(&format!(
        "SELECT {} FROM stock_movements WHERE product_id = ?1 ORDER BY ordinal DESC LIMIT 1",
        MOVEMENT_COLUMNS
    ))
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(movement)
}

async fn all_movements(conn: &mut SqliteConnection, product_id: &str) -> DbResult<Vec<StockMovement>> {
    let movements = sqlx::query_as::<_, StockMovement>(&format!(
        "SELECT {} FROM stock_movements WHERE product_id = ?1 ORDER BY ordinal",
        MOVEMENT_COLUMNS
    ))
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(movements)
}

async fn set_cached_stock(conn: &mut SqliteConnection, product_id: &str, balance: i64) -> DbResult<()> {
    sqlx::query("UPDATE products SET current_stock = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(balance)
        .bind(Utc::now())
        .bind(product_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
