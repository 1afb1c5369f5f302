//! Timeout helpers for store operations.
//!
//! A ledger mutation that cannot get its row lock in time must fail as a
//! retryable error. Dropping the in-flight future releases the in-memory row
//! guard or rolls the PostgreSQL transaction back.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for a single locked ledger mutation (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for read-only queries (10 seconds)
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can stand in for an elapsed deadline
pub trait TimeoutFailure {
    /// Build the error reported when `duration` elapses
    fn timed_out(duration: Duration) -> Self;
}

/// Run `future` with a deadline
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use token_ledger::db::timeouts::with_timeout;
/// use token_ledger::ledger::{LedgerError, LedgerResult};
///
/// # async fn example() -> LedgerResult<i64> {
/// with_timeout(Duration::from_secs(1), async { Ok::<_, LedgerError>(7) }).await
/// # }
/// ```
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: TimeoutFailure,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(E::timed_out(duration)),
    }
}

/// Render a duration as a PostgreSQL `lock_timeout` setting value
pub fn lock_timeout_setting(duration: Duration) -> String {
    format!("{}ms", duration.as_millis().max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Elapsed(Duration);

    impl TimeoutFailure for Elapsed {
        fn timed_out(duration: Duration) -> Self {
            Elapsed(duration)
        }
    }

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let result: Result<u8, Elapsed> =
            with_timeout(Duration::from_secs(1), async { Ok(3) }).await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let result: Result<u8, Elapsed> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(3)
        })
        .await;
        assert_eq!(result, Err(Elapsed(Duration::from_millis(10))));
    }

    #[test]
    fn test_lock_timeout_setting() {
        assert_eq!(lock_timeout_setting(Duration::from_secs(5)), "5000ms");
        assert_eq!(lock_timeout_setting(Duration::ZERO), "1ms");
    }
}
