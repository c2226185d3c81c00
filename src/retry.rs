//! Bounded polling combinator.
//!
//! Repeats an async operation until its result satisfies a predicate, the
//! attempt bound is reached, or the caller cancels. Errors count as "not yet
//! valid" and are logged, never returned.
//!
//! # Usage
//!
//! ```ignore
//! let policy = RetryPolicy::new(6, Duration::from_secs(2));
//!
//! let outcome = poll_until(
//!     policy,
//!     &cancel,
//!     |_attempt| service.get_job_preview(&job_id),
//!     PreviewSnapshot::is_valid,
//! )
//! .await;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// RetryPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Attempt bound and fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy. A bound of zero is raised to one attempt.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PollOutcome
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum PollOutcome<T> {
    /// A result satisfied the predicate.
    Satisfied { value: T, attempts: u32 },
    /// Every attempt ran without a satisfying result.
    Exhausted { attempts: u32 },
    /// The token was cancelled before a result satisfied the predicate.
    Cancelled,
}

// ─────────────────────────────────────────────────────────────────────────────
// poll_until
// ─────────────────────────────────────────────────────────────────────────────

/// Runs `op` until `is_valid` accepts its result.
///
/// # Arguments
///
/// * `policy` - Attempt bound and delay between attempts
/// * `cancel` - Aborts the loop between or during attempts
/// * `op` - Called with the 1-based attempt number
/// * `is_valid` - Validity predicate
///
/// Never sleeps after the final attempt.
pub async fn poll_until<T, F, Fut, P>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
    mut is_valid: P,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
    P: FnMut(&T) -> bool,
{
    for attempt in 1..=policy.max_attempts {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            result = op(attempt) => result,
        };

        match result {
            Ok(value) if is_valid(&value) => {
                return PollOutcome::Satisfied {
                    value,
                    attempts: attempt,
                };
            }
            Ok(_) => {
                debug!(
                    "[RETRY] Attempt {}/{} returned no usable data",
                    attempt, policy.max_attempts
                );
            }
            Err(e) => {
                warn!(
                    "[RETRY] Attempt {}/{} failed: {}",
                    attempt, policy.max_attempts, e
                );
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, Duration::from_millis(2000))
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_valid_result() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = poll_until(
            policy(6),
            &CancellationToken::new(),
            move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<u32, AppError>(if attempt >= 3 { 1 } else { 0 }) }
            },
            |points| *points > 0,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Satisfied { value: 1, attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_attempt_bound() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = tokio::time::Instant::now();

        let outcome = poll_until(
            policy(6),
            &CancellationToken::new(),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<u32, AppError>(0) }
            },
            |points| *points > 0,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 6 });
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        // Five delays between six attempts; none after the last.
        assert_eq!(start.elapsed(), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn errors_count_as_not_yet_valid() {
        let outcome = poll_until(
            policy(3),
            &CancellationToken::new(),
            |attempt| async move {
                if attempt < 3 {
                    Err(AppError::ConnectionFailed("reset".into()))
                } else {
                    Ok(7u32)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Satisfied { value: 7, attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_when_every_attempt_errors() {
        let outcome = poll_until(
            policy(2),
            &CancellationToken::new(),
            |_| async { Err::<u32, _>(AppError::Http { status: 500, message: String::new() }) },
            |_| true,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_delay() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let outcome = poll_until(
            policy(6),
            &cancel,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<u32, AppError>(0) }
            },
            |points| *points > 0,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
