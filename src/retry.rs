//! Bounded-time retry loops shared by every operation that may race server
//! startup.
//!
//! [`retry`] parks the calling thread between attempts while [`retry_async`]
//! awaits a Tokio timer. Both drive the same `RetryState`, so deadline
//! arithmetic, back-off, and error classification cannot drift between the
//! two schedulers.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::observability::LOG_TARGET;

/// First pause between attempts.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(50);
/// Upper bound for the back-off interval.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(1);

/// Timing parameters for a retry loop.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use pg_test_fixtures::RetryPolicy;
///
/// let policy = RetryPolicy::new(Duration::from_secs(5))
///     .with_intervals(Duration::from_millis(10), Duration::from_millis(200));
/// assert_eq!(policy.timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    timeout: Duration,
    initial_interval: Duration,
    max_interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy that gives up once `timeout` has elapsed.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }

    /// Overrides the back-off bounds. The interval doubles after every failed
    /// attempt until it reaches `max`.
    #[must_use]
    pub fn with_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_interval = initial;
        self.max_interval = max.max(initial);
        self
    }

    /// Returns the overall time budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Failure raised by [`retry`] and [`retry_async`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation kept failing with retryable errors until the budget ran
    /// out. Carries the last observed error.
    #[error("operation timed out after {elapsed:?} ({attempts} attempts); last error: {last}")]
    TimedOut {
        /// Time spent across all attempts.
        elapsed: Duration,
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        last: E,
    },
    /// The operation failed with an error the caller marked as not retryable.
    #[error(transparent)]
    Fatal(E),
}

impl<E> RetryError<E> {
    /// Returns the underlying error regardless of how the loop ended.
    #[must_use]
    pub fn into_inner(self) -> E {
        match self {
            Self::TimedOut { last, .. } | Self::Fatal(last) => last,
        }
    }

    /// Reports whether the loop ended because the budget ran out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Decides, after each failure, whether to pause and try again.
#[derive(Debug)]
struct RetryState {
    policy: RetryPolicy,
    started: Instant,
    attempts: u32,
    interval: Duration,
}

impl RetryState {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            started: Instant::now(),
            attempts: 0,
            interval: policy.initial_interval,
        }
    }

    /// Records a retryable failure and returns the pause before the next
    /// attempt, or the terminal error when the budget is spent.
    fn after_failure<E>(&mut self, err: E) -> Result<Duration, RetryError<E>> {
        self.attempts = self.attempts.saturating_add(1);
        let elapsed = self.started.elapsed();
        let Some(remaining) = self.policy.timeout.checked_sub(elapsed) else {
            return Err(self.timed_out(err));
        };
        if remaining.is_zero() {
            return Err(self.timed_out(err));
        }
        let pause = self.interval.min(remaining);
        self.interval = self
            .interval
            .saturating_mul(2)
            .min(self.policy.max_interval);
        tracing::debug!(
            target: LOG_TARGET,
            attempt = self.attempts,
            pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
            "retrying after transient failure"
        );
        Ok(pause)
    }

    fn timed_out<E>(&self, last: E) -> RetryError<E> {
        RetryError::TimedOut {
            elapsed: self.started.elapsed(),
            attempts: self.attempts,
            last,
        }
    }
}

/// Repeatedly invokes `operation` until it succeeds or `policy.timeout()`
/// elapses, sleeping the current thread between attempts.
///
/// Errors for which `is_retryable` returns `false` propagate immediately as
/// [`RetryError::Fatal`].
///
/// # Errors
/// Returns [`RetryError::TimedOut`] with the last error once the budget is
/// exhausted, or [`RetryError::Fatal`] for non-retryable failures.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use pg_test_fixtures::{RetryPolicy, retry};
///
/// let mut calls = 0;
/// let value = retry(
///     || {
///         calls += 1;
///         if calls < 3 { Err("not yet") } else { Ok(calls) }
///     },
///     RetryPolicy::new(Duration::from_secs(2)),
///     |_| true,
/// )?;
/// assert_eq!(value, 3);
/// # Ok::<(), pg_test_fixtures::RetryError<&str>>(())
/// ```
pub fn retry<T, E, F, P>(
    mut operation: F,
    policy: RetryPolicy,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new(policy);
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                let pause = state.after_failure(err)?;
                std::thread::sleep(pause);
            }
            Err(err) => return Err(RetryError::Fatal(err)),
        }
    }
}

/// Cooperative counterpart of [`retry`]: awaits a Tokio timer between
/// attempts instead of blocking the thread.
///
/// # Errors
/// Identical to [`retry`].
pub async fn retry_async<T, E, F, Fut, P>(
    mut operation: F,
    policy: RetryPolicy,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new(policy);
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                let pause = state.after_failure(err)?;
                tokio::time::sleep(pause).await;
            }
            Err(err) => return Err(RetryError::Fatal(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::Cell;

    #[derive(Debug, PartialEq, Eq)]
    enum Probe {
        Refused,
        AuthFailed,
    }

    fn fast(timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(timeout_ms))
            .with_intervals(Duration::from_millis(5), Duration::from_millis(20))
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0_u32);
        let result = retry(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 4 {
                    Err(Probe::Refused)
                } else {
                    Ok("ready")
                }
            },
            fast(2_000),
            |err| *err == Probe::Refused,
        );
        assert_eq!(result.expect("should succeed"), "ready");
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn non_retryable_errors_propagate_immediately() {
        let calls = Cell::new(0_u32);
        let result: Result<(), _> = retry(
            || {
                calls.set(calls.get() + 1);
                Err(Probe::AuthFailed)
            },
            fast(2_000),
            |err| *err == Probe::Refused,
        );
        let err = result.expect_err("should fail");
        assert!(!err.is_timeout());
        assert_eq!(err.into_inner(), Probe::AuthFailed);
        assert_eq!(calls.get(), 1);
    }

    #[rstest]
    #[case::short(50)]
    #[case::medium(200)]
    fn always_failing_operation_times_out_within_bound(#[case] timeout_ms: u64) {
        let started = Instant::now();
        let result: Result<(), _> = retry(|| Err(Probe::Refused), fast(timeout_ms), |_| true);
        let elapsed = started.elapsed();

        let err = result.expect_err("should time out");
        assert!(err.is_timeout(), "expected timeout, got {err:?}");
        assert!(
            elapsed < Duration::from_millis(timeout_ms + 100),
            "overshoot too large: {elapsed:?}"
        );
        match err {
            RetryError::TimedOut { last, attempts, .. } => {
                assert_eq!(last, Probe::Refused);
                assert!(attempts >= 2);
            }
            RetryError::Fatal(other) => panic!("unexpected fatal error {other:?}"),
        }
    }

    #[test]
    fn zero_timeout_makes_a_single_attempt() {
        let calls = Cell::new(0_u32);
        let result: Result<(), _> = retry(
            || {
                calls.set(calls.get() + 1);
                Err(Probe::Refused)
            },
            RetryPolicy::new(Duration::ZERO),
            |_| true,
        );
        assert!(result.expect_err("should time out").is_timeout());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn async_variant_matches_blocking_semantics() {
        let calls = Cell::new(0_u32);
        let ok = retry_async(
            || {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt < 3 {
                        Err(Probe::Refused)
                    } else {
                        Ok(attempt)
                    }
                }
            },
            fast(2_000),
            |err| *err == Probe::Refused,
        )
        .await;
        assert_eq!(ok.expect("should succeed"), 3);

        let fatal: Result<(), _> =
            retry_async(|| async { Err(Probe::AuthFailed) }, fast(2_000), |err| {
                *err == Probe::Refused
            })
            .await;
        assert!(!fatal.expect_err("should fail").is_timeout());
    }

    #[tokio::test]
    async fn async_variant_times_out_within_bound() {
        let started = Instant::now();
        let result: Result<(), _> =
            retry_async(|| async { Err(Probe::Refused) }, fast(100), |_| true).await;
        assert!(result.expect_err("should time out").is_timeout());
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
