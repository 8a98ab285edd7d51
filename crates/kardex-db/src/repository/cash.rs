//! # Cash Ledger
//!
//! Register sessions and their append-only movement log.
//!
//! ## Register Session
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  open_register(name, opening)  ──► status: open                        │
//! │       │                                                                 │
//! │       ├── append(Credit, amount)   sale paid in cash                   │
//! │       ├── append(Debit, amount)    payout, voided sale                 │
//! │       │      balance < amount ──► InsufficientBalance                  │
//! │       ▼                                                                 │
//! │  close_register(counted?)      ──► status: closed                      │
//! │       │                                                                 │
//! │       └── any further append ──► RegisterClosed                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The first movement continues from the opening balance rather than 0.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbResult, LedgerError, LedgerResult};
use crate::repository::locks;
use crate::retry::RetryPolicy;
use kardex_core::validation::{
    validate_amount_cents, validate_balance_cents, validate_id, validate_name, validate_note,
};
use kardex_core::{
    next_balance, replay, BalanceError, CashMovement, CashMovementKind, CashRegister, CoreError,
    LedgerAudit, LedgerBreak, Money, MovementReference, RegisterStatus, UserRef, ValidationError,
};

const MOVEMENT_COLUMNS: &str = r#"
    id, register_id, ordinal, kind, amount_cents,
    balance_before_cents, balance_after_cents, reference_type, reference_id,
    concept, user_id, occurred_at
"#;

const REGISTER_COLUMNS: &str = r#"
    id, name, status, opening_balance_cents, current_balance_cents,
    counted_balance_cents, opened_by, opened_at, closed_by, closed_at
"#;

/// A cash movement about to be appended.
#[derive(Debug, Clone)]
pub(crate) struct CashEntry<'a> {
    pub register_id: &'a str,
    pub kind: CashMovementKind,
    pub amount: Money,
    pub reference: Option<&'a MovementReference>,
    pub concept: Option<&'a str>,
    pub user: &'a UserRef,
}

/// The cash ledger.
#[derive(Debug, Clone)]
pub struct CashLedger {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl CashLedger {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        CashLedger { pool, retry }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Opens a register session.
    ///
    /// Two sessions with the same name cannot be open at the same time.
    pub async fn open_register(
        &self,
        name: &str,
        opening_balance: Money,
        user: &UserRef,
    ) -> LedgerResult<CashRegister> {
        validate_name("name", name)?;
        validate_balance_cents("opening_balance", opening_balance.cents())?;

        self.retry
            .run("cash.open_register", || {
                self.open_register_once(name, opening_balance, user)
            })
            .await
    }

    async fn open_register_once(
        &self,
        name: &str,
        opening_balance: Money,
        user: &UserRef,
    ) -> LedgerResult<CashRegister> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::register_name_key(name)).await?;

        let already_open: Option<String> = sqlx::query_scalar(
            "SELECT id FROM cash_registers WHERE name = ?1 AND status = 'open'",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        if already_open.is_some() {
            return Err(ValidationError::Duplicate {
                field: "name".to_string(),
                value: name.to_string(),
            }
            .into());
        }

        let register = CashRegister {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: RegisterStatus::Open,
            opening_balance_cents: opening_balance.cents(),
            current_balance_cents: opening_balance.cents(),
            counted_balance_cents: None,
            opened_by: user.id.clone(),
            opened_at: Utc::now(),
            closed_by: None,
            closed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO cash_registers (
                id, name, status, opening_balance_cents, current_balance_cents,
                counted_balance_cents, opened_by, opened_at, closed_by, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, NULL, NULL)
            "#,
        )
        .bind(&register.id)
        .bind(&register.name)
        .bind(register.status)
        .bind(register.opening_balance_cents)
        .bind(register.current_balance_cents)
        .bind(&register.opened_by)
        .bind(register.opened_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            register_id = %register.id,
            name = %register.name,
            opening = %opening_balance,
            user = %user.name,
            "Cash register opened"
        );
        Ok(register)
    }

    /// Closes a register session, optionally recording the counted cash.
    pub async fn close_register(
        &self,
        register_id: &str,
        counted: Option<Money>,
        user: &UserRef,
    ) -> LedgerResult<CashRegister> {
        validate_id("register_id", register_id)?;
        if let Some(counted) = counted {
            validate_balance_cents("counted_balance", counted.cents())?;
        }

        self.retry
            .run("cash.close_register", || {
                self.close_register_once(register_id, counted, user)
            })
            .await
    }

    async fn close_register_once(
        &self,
        register_id: &str,
        counted: Option<Money>,
        user: &UserRef,
    ) -> LedgerResult<CashRegister> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::cash_key(register_id)).await?;

        let mut register = ensure_register(&mut *tx, register_id).await?;
        if !register.is_open() {
            return Err(CoreError::RegisterClosed {
                register_id: register_id.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        register.status = RegisterStatus::Closed;
        register.counted_balance_cents = counted.map(|c| c.cents());
        register.closed_by = Some(user.id.clone());
        register.closed_at = Some(now);

        sqlx::query(
            r#"
            UPDATE cash_registers
            SET status = ?1, counted_balance_cents = ?2, closed_by = ?3, closed_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(register.status)
        .bind(register.counted_balance_cents)
        .bind(&register.closed_by)
        .bind(register.closed_at)
        .bind(register_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            register_id = %register_id,
            expected = %register.current_balance(),
            difference = ?register.difference(),
            "Cash register closed"
        );
        Ok(register)
    }

    pub async fn get_register(&self, register_id: &str) -> LedgerResult<Option<CashRegister>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_register(&mut conn, register_id).await?)
    }

    // =========================================================================
    // Movements
    // =========================================================================

    /// Appends a manual credit or debit.
    ///
    /// ## Errors
    /// - `ReferencedEntityNotFound` if the register does not exist
    /// - `RegisterClosed` once the session is closed
    /// - `InsufficientBalance` if a debit exceeds the balance
    pub async fn append(
        &self,
        register_id: &str,
        kind: CashMovementKind,
        amount: Money,
        concept: Option<&str>,
        user: &UserRef,
    ) -> LedgerResult<CashMovement> {
        let entry = CashEntry {
            register_id,
            kind,
            amount,
            reference: None,
            concept,
            user,
        };

        self.retry
            .run("cash.append", || self.append_once(&entry))
            .await
    }

    async fn append_once(&self, entry: &CashEntry<'_>) -> LedgerResult<CashMovement> {
        let mut tx = self.pool.begin().await?;
        let movement = append_in_tx(&mut *tx, entry).await?;
        tx.commit().await?;
        Ok(movement)
    }

    /// Balance after the latest movement, the opening balance if none.
    pub async fn current_balance(&self, register_id: &str) -> LedgerResult<Money> {
        let mut conn = self.pool.acquire().await?;
        let register = ensure_register(&mut conn, register_id).await?;
        let latest = latest_movement(&mut conn, register_id).await?;

        Ok(Money::from_cents(
            latest
                .map(|m| m.balance_after_cents)
                .unwrap_or(register.opening_balance_cents),
        ))
    }

    /// Balance as of `at`. Zero before the session was opened.
    pub async fn balance_as_of(&self, register_id: &str, at: DateTime<Utc>) -> LedgerResult<Money> {
        let mut conn = self.pool.acquire().await?;
        let register = ensure_register(&mut conn, register_id).await?;

        if at < register.opened_at {
            return Ok(Money::zero());
        }

        let movements = sqlx::query_as::<_, CashMovement>(&format!(
            "SELECT {} FROM cash_movements WHERE register_id = ?1 AND occurred_at <= ?2 ORDER BY ordinal",
            MOVEMENT_COLUMNS
        ))
        .bind(register_id)
        .bind(at)
        .fetch_all(&mut *conn)
        .await?;

        let balance = replay(register.opening_balance_cents, &movements)
            .map_err(|brk| inconsistent(register_id, brk))?;
        Ok(Money::from_cents(balance))
    }

    /// Movements in ordinal order, optionally bounded by time (inclusive).
    pub async fn history(
        &self,
        register_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<CashMovement>> {
        validate_id("register_id", register_id)?;

        let movements = sqlx::query_as::<_, CashMovement>(&format!(
            r#"
            SELECT {} FROM cash_movements
            WHERE register_id = ?1
              AND (?2 IS NULL OR occurred_at >= ?2)
              AND (?3 IS NULL OR occurred_at <= ?3)
            ORDER BY ordinal
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(register_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    pub async fn latest(&self, register_id: &str) -> LedgerResult<Option<CashMovement>> {
        let mut conn = self.pool.acquire().await?;
        Ok(latest_movement(&mut conn, register_id).await?)
    }

    /// Replays the register's log from its opening balance.
    pub async fn audit(&self, register_id: &str) -> LedgerResult<LedgerAudit> {
        let mut conn = self.pool.acquire().await?;
        let register = ensure_register(&mut conn, register_id).await?;
        let movements = all_movements(&mut conn, register_id).await?;

        let audit = LedgerAudit::from_replay(
            register_id,
            register.opening_balance_cents,
            &movements,
            register.current_balance_cents,
        );
        if !audit.is_consistent() {
            warn!(register_id = %register_id, ?audit, "Cash ledger audit failed");
        }
        Ok(audit)
    }

    /// Recomputes `cash_registers.current_balance_cents` from the opening
    /// balance and the log. Works on closed registers too.
    ///
    /// Refuses to touch the cache when the log itself is broken.
    pub async fn rebuild_balance(&self, register_id: &str) -> LedgerResult<Money> {
        self.retry
            .run("cash.rebuild_balance", || self.rebuild_once(register_id))
            .await
    }

    async fn rebuild_once(&self, register_id: &str) -> LedgerResult<Money> {
        let mut tx = self.pool.begin().await?;
        locks::claim(&mut *tx, &locks::cash_key(register_id)).await?;

        let register = ensure_register(&mut *tx, register_id).await?;
        let movements = all_movements(&mut *tx, register_id).await?;
        let balance = replay(register.opening_balance_cents, &movements)
            .map_err(|brk| inconsistent(register_id, brk))?;

        if balance != register.current_balance_cents {
            warn!(
                register_id = %register_id,
                cached = register.current_balance_cents,
                replayed = balance,
                "Rewriting drifted register cache"
            );
            sqlx::query("UPDATE cash_registers SET current_balance_cents = ?1 WHERE id = ?2")
                .bind(balance)
                .bind(register_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Money::from_cents(balance))
    }
}

// =============================================================================
// Transaction-level helpers
// =============================================================================

/// Appends one cash movement inside the caller's transaction.
pub(crate) async fn append_in_tx(
    conn: &mut SqliteConnection,
    entry: &CashEntry<'_>,
) -> LedgerResult<CashMovement> {
    validate_amount_cents(entry.amount.cents())?;
    validate_note("concept", entry.concept)?;

    locks::claim(conn, &locks::cash_key(entry.register_id)).await?;

    let register = ensure_register(conn, entry.register_id).await?;
    if !register.is_open() {
        return Err(CoreError::RegisterClosed {
            register_id: entry.register_id.to_string(),
        }
        .into());
    }

    let latest = latest_movement(conn, entry.register_id).await?;
    let before = latest
        .as_ref()
        .map(|m| m.balance_after_cents)
        .unwrap_or(register.opening_balance_cents);

    if register.current_balance_cents != before {
        warn!(
            register_id = %entry.register_id,
            cached = register.current_balance_cents,
            ledger = before,
            "Register cache drifted from ledger, ledger wins"
        );
    }

    let after = next_balance(before, entry.kind.direction(), entry.amount.cents())
        .map_err(|e| balance_error(entry.register_id, e))?;

    let now = Utc::now();
    let movement = CashMovement {
        id: Uuid::new_v4().to_string(),
        register_id: entry.register_id.to_string(),
        ordinal: latest.as_ref().map(|m| m.ordinal + 1).unwrap_or(1),
        kind: entry.kind,
        amount_cents: entry.amount.cents(),
        balance_before_cents: before,
        balance_after_cents: after,
        reference_type: entry.reference.map(|r| r.reference_type),
        reference_id: entry.reference.map(|r| r.reference_id.clone()),
        concept: entry.concept.map(str::to_string),
        user_id: entry.user.id.clone(),
        occurred_at: latest.map(|m| m.occurred_at.max(now)).unwrap_or(now),
    };

    sqlx::query(
        r#"
        INSERT INTO cash_movements (
            id, register_id, ordinal, kind, amount_cents,
            balance_before_cents, balance_after_cents, reference_type, reference_id,
            concept, user_id, occurred_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.register_id)
    .bind(movement.ordinal)
    .bind(movement.kind)
    .bind(movement.amount_cents)
    .bind(movement.balance_before_cents)
    .bind(movement.balance_after_cents)
    .bind(movement.reference_type)
    .bind(&movement.reference_id)
    .bind(&movement.concept)
    .bind(&movement.user_id)
    .bind(movement.occurred_at)
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE cash_registers SET current_balance_cents = ?1 WHERE id = ?2")
        .bind(after)
        .bind(entry.register_id)
        .execute(&mut *conn)
        .await?;

    debug!(
        register_id = %movement.register_id,
        ordinal = movement.ordinal,
        kind = ?movement.kind,
        amount = %movement.amount(),
        balance_after = %movement.balance_after(),
        "Cash movement appended"
    );

    Ok(movement)
}

/// Loads a register inside the caller's transaction, or fails with
/// `ReferencedEntityNotFound`.
pub(crate) async fn ensure_register(
    conn: &mut SqliteConnection,
    register_id: &str,
) -> LedgerResult<CashRegister> {
    validate_id("register_id", register_id)?;
    fetch_register(conn, register_id)
        .await?
        .ok_or_else(|| CoreError::missing_reference("CashRegister", "register_id", register_id).into())
}

pub(crate) async fn fetch_register(
    conn: &mut SqliteConnection,
    register_id: &str,
) -> DbResult<Option<CashRegister>> {
    let register = sqlx::query_as::<_, CashRegister>(&format!(
        "SELECT {} FROM cash_registers WHERE id = ?1",
        REGISTER_COLUMNS
    ))
    .bind(register_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(register)
}

async fn latest_movement(
    conn: &mut SqliteConnection,
    register_id: &str,
) -> DbResult<Option<CashMovement>> {
    let movement = sqlx::query_as::<_, CashMovement>(&format!(
        "SELECT {} FROM cash_movements WHERE register_id = ?1 ORDER BY ordinal DESC LIMIT 1",
        MOVEMENT_COLUMNS
    ))
    .bind(register_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(movement)
}

async fn all_movements(
    conn: &mut SqliteConnection,
    register_id: &str,
) -> DbResult<Vec<CashMovement>> {
    let movements = sqlx::query_as::<_, CashMovement>(&format!(
        "SELECT {} FROM cash_movements WHERE register_id = ?1 ORDER BY ordinal",
        MOVEMENT_COLUMNS
    ))
    .bind(register_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(movements)
}

fn balance_error(register_id: &str, err: BalanceError) -> LedgerError {
    match err {
        BalanceError::Insufficient {
            available,
            requested,
        } => CoreError::InsufficientBalance {
            register_id: register_id.to_string(),
            available: Money::from_cents(available),
            requested: Money::from_cents(requested),
        }
        .into(),
        BalanceError::NonPositive(_) => ValidationError::MustBePositive {
            field: "amount".to_string(),
        }
        .into(),
        BalanceError::Overflow => ValidationError::Overflow {
            field: "amount".to_string(),
        }
        .into(),
    }
}

fn inconsistent(register_id: &str, brk: LedgerBreak) -> CoreError {
    CoreError::LedgerInconsistent {
        subject: format!("register {}", register_id),
        reason: format!("ordinal {}: {}", brk.ordinal, brk.reason),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
