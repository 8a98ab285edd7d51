//! # Ledger Arithmetic
//!
//! The balance rules shared by the stock and cash ledgers, with no storage.
//!
//! ## Chain Invariant
//! ```text
//! ordinal:         1            2            3
//!              ┌────────┐   ┌────────┐   ┌────────┐
//! before→after │  0 → 10│──►│ 10 → 7 │──►│  7 → 9 │     current = 9
//!              └────────┘   └────────┘   └────────┘
//!                 in 10        out 3        in 2
//!
//! after[i] == before[i+1]     after[i] >= 0     ordinals 1, 2, 3, ...
//! ```
//!
//! `next_balance` decides a single append; `replay` re-derives a balance
//! from a whole log and reports the first link that breaks the chain.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::types::{CashMovement, Direction, StockMovement};

// =============================================================================
// Single Transition
// =============================================================================

/// Why a balance transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("available {available}, requested {requested}")]
    Insufficient { available: i64, requested: i64 },

    #[error("movement magnitude must be positive, got {0}")]
    NonPositive(i64),

    #[error("balance overflow")]
    Overflow,
}

/// Computes the balance after moving `magnitude` units in `direction`.
///
/// ## Example
/// ```rust
/// use kardex_core::ledger::{next_balance, BalanceError};
/// use kardex_core::types::Direction;
///
/// assert_eq!(next_balance(10, Direction::Out, 3), Ok(7));
/// assert_eq!(
///     next_balance(2, Direction::Out, 5),
///     Err(BalanceError::Insufficient { available: 2, requested: 5 })
/// );
/// ```
pub fn next_balance(before: i64, direction: Direction, magnitude: i64) -> Result<i64, BalanceError> {
    if magnitude <= 0 {
        return Err(BalanceError::NonPositive(magnitude));
    }

    match direction {
        Direction::In => before.checked_add(magnitude).ok_or(BalanceError::Overflow),
        Direction::Out => {
            if before < magnitude {
                return Err(BalanceError::Insufficient {
                    available: before,
                    requested: magnitude,
                });
            }
            Ok(before - magnitude)
        }
    }
}

// =============================================================================
// Replay
// =============================================================================

/// A persisted movement seen through the chain invariant.
pub trait LedgerEntry {
    fn ordinal(&self) -> i64;
    fn direction(&self) -> Direction;
    fn magnitude(&self) -> i64;
    fn balance_before(&self) -> i64;
    fn balance_after(&self) -> i64;
}

impl LedgerEntry for StockMovement {
    fn ordinal(&self) -> i64 {
        self.ordinal
    }
    fn direction(&self) -> Direction {
        self.direction
    }
    fn magnitude(&self) -> i64 {
        self.quantity
    }
    fn balance_before(&self) -> i64 {
        self.balance_before
    }
    fn balance_after(&self) -> i64 {
        self.balance_after
    }
}

impl LedgerEntry for CashMovement {
    fn ordinal(&self) -> i64 {
        self.ordinal
    }
    fn direction(&self) -> Direction {
        self.kind.direction()
    }
    fn magnitude(&self) -> i64 {
        self.amount_cents
    }
    fn balance_before(&self) -> i64 {
        self.balance_before_cents
    }
    fn balance_after(&self) -> i64 {
        self.balance_after_cents
    }
}

/// First place a log stops satisfying the chain invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerBreak {
    pub ordinal: i64,
    pub reason: String,
}

/// Replays `entries` (in ordinal order, starting at ordinal 1) from
/// `opening` and returns the resulting balance.
pub fn replay<E: LedgerEntry>(opening: i64, entries: &[E]) -> Result<i64, LedgerBreak> {
    let mut balance = opening;

    for (index, entry) in entries.iter().enumerate() {
        let expected_ordinal = index as i64 + 1;
        let at = |reason: String| LedgerBreak {
            ordinal: entry.ordinal(),
            reason,
        };

        if entry.ordinal() != expected_ordinal {
            return Err(at(format!(
                "expected ordinal {}, found {}",
                expected_ordinal,
                entry.ordinal()
            )));
        }

        if entry.balance_before() != balance {
            return Err(at(format!(
                "balance_before {} does not continue previous balance {}",
                entry.balance_before(),
                balance
            )));
        }

        let after = next_balance(balance, entry.direction(), entry.magnitude())
            .map_err(|e| at(e.to_string()))?;

        if entry.balance_after() != after {
            return Err(at(format!(
                "balance_after {} should be {}",
                entry.balance_after(),
                after
            )));
        }

        balance = after;
    }

    Ok(balance)
}

/// Outcome of checking one subject's ledger against its cached balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerAudit {
    pub subject_id: String,
    pub movements: usize,
    /// Balance re-derived from the log, `None` if the chain is broken.
    pub replayed_balance: Option<i64>,
    pub cached_balance: i64,
    pub chain_break: Option<LedgerBreak>,
}

impl LedgerAudit {
    pub fn from_replay<E: LedgerEntry>(
        subject_id: impl Into<String>,
        opening: i64,
        entries: &[E],
        cached_balance: i64,
    ) -> Self {
        let (replayed_balance, chain_break) = match replay(opening, entries) {
            Ok(balance) => (Some(balance), None),
            Err(brk) => (None, Some(brk)),
        };

        LedgerAudit {
            subject_id: subject_id.into(),
            movements: entries.len(),
            replayed_balance,
            cached_balance,
            chain_break,
        }
    }

    /// Chain intact and cache equal to the replayed balance.
    pub fn is_consistent(&self) -> bool {
        self.chain_break.is_none() && self.replayed_balance == Some(self.cached_balance)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    struct Entry {
        ordinal: i64,
        direction: Direction,
        magnitude: i64,
        before: i64,
        after: i64,
    }

    impl LedgerEntry for Entry {
        fn ordinal(&self) -> i64 {
            self.ordinal
        }
        fn direction(&self) -> Direction {
            self.direction
        }
        fn magnitude(&self) -> i64 {
            self.magnitude
        }
        fn balance_before(&self) -> i64 {
            self.before
        }
        fn balance_after(&self) -> i64 {
            self.after
        }
    }

    /// Appends every request that the ledger would accept.
    fn build(opening: i64, requests: &[(Direction, i64)]) -> Vec<Entry> {
        let mut balance = opening;
        let mut entries = Vec::new();
        for (direction, magnitude) in requests {
            if let Ok(after) = next_balance(balance, *direction, *magnitude) {
                entries.push(Entry {
                    ordinal: entries.len() as i64 + 1,
                    direction: *direction,
                    magnitude: *magnitude,
                    before: balance,
                    after,
                });
                balance = after;
            }
        }
        entries
    }

    #[test]
    fn test_next_balance() {
        assert_eq!(next_balance(0, Direction::In, 10), Ok(10));
        assert_eq!(next_balance(10, Direction::Out, 10), Ok(0));
        assert_eq!(next_balance(5, Direction::In, 0), Err(BalanceError::NonPositive(0)));
        assert_eq!(next_balance(i64::MAX, Direction::In, 1), Err(BalanceError::Overflow));
    }

    #[test]
    fn test_replay_valid_chain() {
        let entries = build(0, &[(Direction::In, 10), (Direction::Out, 3), (Direction::In, 2)]);
        assert_eq!(replay(0, &entries), Ok(9));
    }

    #[test]
    fn test_replay_detects_gap_in_chain() {
        let mut entries = build(0, &[(Direction::In, 10), (Direction::Out, 3)]);
        entries[1].before = 8;
        let brk = replay(0, &entries).unwrap_err();
        assert_eq!(brk.ordinal, 2);
    }

    #[test]
    fn test_replay_detects_wrong_arithmetic() {
        let mut entries = build(0, &[(Direction::In, 10)]);
        entries[0].after = 11;
        assert!(replay(0, &entries).is_err());
    }

    #[test]
    fn test_replay_detects_missing_ordinal() {
        let mut entries = build(0, &[(Direction::In, 10), (Direction::In, 1)]);
        entries[1].ordinal = 3;
        assert!(replay(0, &entries).unwrap_err().reason.contains("ordinal"));
    }

    #[test]
    fn test_audit_reports_cache_drift() {
        let entries = build(100, &[(Direction::Out, 30)]);
        let audit = LedgerAudit::from_replay("r-1", 100, &entries, 75);
        assert_eq!(audit.replayed_balance, Some(70));
        assert!(!audit.is_consistent());

        let audit = LedgerAudit::from_replay("r-1", 100, &entries, 70);
        assert!(audit.is_consistent());
    }

    fn arb_request() -> impl Strategy<Value = (Direction, i64)> {
        (prop_oneof![Just(Direction::In), Just(Direction::Out)], 1i64..500)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn prop_accepted_appends_keep_chain_consistent(
            opening in 0i64..1000,
            requests in prop::collection::vec(arb_request(), 0..60),
        ) {
            let entries = build(opening, &requests);

            for pair in entries.windows(2) {
                prop_assert_eq!(pair[0].after, pair[1].before);
            }
            for entry in &entries {
                prop_assert!(entry.after >= 0);
            }

            let expected = entries.last().map(|e| e.after).unwrap_or(opening);
            prop_assert_eq!(replay(opening, &entries), Ok(expected));
        }

        #[test]
        fn prop_outbound_never_exceeds_balance(before in 0i64..1000, qty in 1i64..2000) {
            match next_balance(before, Direction::Out, qty) {
                Ok(after) => prop_assert_eq!(after, before - qty),
                Err(BalanceError::Insufficient { available, requested }) => {
                    prop_assert!(qty > before);
                    prop_assert_eq!(available, before);
                    prop_assert_eq!(requested, qty);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
