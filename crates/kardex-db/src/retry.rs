//! # Conflict Retry
//!
//! Bounded re-execution of whole transactions that lost a race.
//!
//! ## Flow
//! ```text
//! attempt 1 ──► Ok ─────────────────────────────────────► return
//!     │
//!     └─► transient (busy, guard UNIQUE) ──► sleep(backoff) ──► attempt 2 ...
//!     │
//!     └─► anything else (insufficient stock, closed register, ...) ──► return
//!
//! attempt == max_attempts and still transient ──► ConcurrencyConflict
//! ```
//!
//! Every attempt re-runs the operation from its first statement, so nothing
//! read by a failed attempt leaks into the next one.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{LedgerError, LedgerResult};

/// How many times, and how patiently, to retry a conflicting operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first transient failure.
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Runs `attempt` until it succeeds, fails permanently, or runs out of
    /// attempts.
    ///
    /// ## Arguments
    /// * `operation` - Name used in logs and in `ConcurrencyConflict`
    /// * `attempt` - Builds one full attempt; called again for every retry
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match attempt().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation, attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    if attempts >= self.max_attempts {
                        error!(operation, attempts, error = %err, "Giving up on conflicting operation");
                        return Err(LedgerError::ConcurrencyConflict {
                            operation: operation.to_string(),
                            attempts,
                        });
                    }

                    let wait = backoff.next_backoff().unwrap_or(self.max_backoff);
                    warn!(operation, attempts, ?wait, error = %err, "Conflict, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use kardex_core::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = fast_policy(5)
            .run("test", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(LedgerError::from(DbError::Busy("database is locked".into())))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_conflict() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: LedgerResult<()> = fast_policy(3)
            .run("sequence.next", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(LedgerError::from(DbError::Busy("locked".into())))
                }
            })
            .await;

        match result {
            Err(LedgerError::ConcurrencyConflict { operation, attempts }) => {
                assert_eq!(operation, "sequence.next");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: LedgerResult<()> = fast_policy(5)
            .run("stock.append", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(LedgerError::from(CoreError::RegisterClosed {
                        register_id: "r".into(),
                    }))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(LedgerError::Domain(CoreError::RegisterClosed { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
