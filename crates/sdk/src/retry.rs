//! Retry logic with exponential backoff.
//!
//! Provides retry wrappers using the `backon` crate with
//! configurable backoff policies. Unary calls go through
//! [`with_retry_cancellable`], which additionally races every attempt
//! against a [`CancellationToken`].

use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    config::RetryPolicy,
    error::{ClientError, Result},
};

/// Execute an async operation with retry using exponential backoff.
///
/// The operation is retried according to the provided [`RetryPolicy`] if it
/// fails with a retryable error (per [`ClientError::is_retryable`]).
///
/// # Retry Strategy
///
/// - **Exponential backoff**: `initial_backoff * multiplier^(attempt-1)`
/// - **Jitter**: ±`jitter` randomness applied to prevent thundering herd
/// - **Cap**: backoff capped at `max_backoff`
/// - **Termination**: after `max_attempts` failed attempts
///
/// Non-retryable errors (e.g. `INVALID_ARGUMENT`, `UNAUTHENTICATED`) are
/// returned immediately without retry.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // backon's max_times counts retries, not total attempts.
    let max_retries = policy.max_attempts.saturating_sub(1) as usize;

    let backoff = ExponentialBuilder::new()
        .with_min_delay(policy.initial_backoff)
        .with_max_delay(policy.max_backoff)
        .with_factor(policy.multiplier as f32)
        .with_max_times(max_retries);

    let attempt_count = std::sync::atomic::AtomicU32::new(0);
    let jitter_factor = policy.jitter;

    operation
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(|e: &ClientError| e.is_retryable())
        .notify(|err: &ClientError, dur: Duration| {
            let attempt = attempt_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            let jittered = apply_jitter(dur, jitter_factor);

            tracing::debug!(
                attempt = attempt,
                backoff_ms = jittered.as_millis() as u64,
                error = %err,
                "retrying after backoff"
            );
        })
        .await
        .map_err(|e| {
            // Exhausted retryable errors wrap in RetryExhausted; non-retryable
            // errors return as-is.
            if e.is_retryable() {
                let attempts = attempt_count.load(std::sync::atomic::Ordering::SeqCst) + 1;
                ClientError::RetryExhausted { attempts, last_error: e.to_string() }
            } else {
                e
            }
        })
}

/// Execute an async operation with retry and cancellation support.
///
/// Behaves like [`with_retry`], but races each attempt and each backoff
/// sleep against the provided `CancellationToken`.
///
/// # Cancellation Semantics
///
/// - Token already cancelled at call time: returns `Cancelled` immediately.
/// - Token cancelled during an attempt: the in-flight attempt is dropped and
///   `Cancelled` is returned.
/// - Token cancelled during a backoff sleep: the sleep is interrupted and
///   `Cancelled` is returned.
pub async fn with_retry_cancellable<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(ClientError::Cancelled);
    }

    let mut attempt: u32 = 0;
    let mut backoff_duration = policy.initial_backoff;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(ClientError::Cancelled);
            }
            result = operation() => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                // Non-retryable or out of attempts: return immediately
                if !err.is_retryable() || attempt >= policy.max_attempts {
                    if err.is_retryable() {
                        return Err(ClientError::RetryExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                    return Err(err);
                }

                let jittered = apply_jitter(backoff_duration, policy.jitter);

                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = jittered.as_millis() as u64,
                    error = %err,
                    "retrying after backoff (cancellable)"
                );

                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        return Err(ClientError::Cancelled);
                    }
                    () = tokio::time::sleep(jittered) => {}
                }

                backoff_duration = std::cmp::min(
                    Duration::from_nanos(
                        (backoff_duration.as_nanos() as f64 * policy.multiplier) as u64,
                    ),
                    policy.max_backoff,
                );
            },
        }
    }
}

/// Apply jitter to a duration.
///
/// Jitter adds randomness in the range `[dur * (1 - factor), dur * (1 + factor)]`
/// to prevent thundering herd when multiple clients retry simultaneously.
fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();

    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rng.random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use tonic::Code;

    use super::*;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0, // No jitter for deterministic tests
        }
    }

    fn unavailable() -> ClientError {
        ClientError::Rpc { code: Code::Unavailable, message: "unavailable".to_owned() }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = test_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = with_retry(&policy, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ClientError>("success")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_error_until_success() {
        let policy = test_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = with_retry(&policy, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_in_retry_exhausted() {
        let policy = test_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = with_retry(&policy, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let policy = test_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = with_retry(&policy, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Rpc {
                    code: Code::InvalidArgument,
                    message: "bad".to_owned(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::Rpc { code: Code::InvalidArgument, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry for non-retryable");
    }

    #[tokio::test]
    async fn test_cancellable_returns_cancelled_when_pre_cancelled() {
        let policy = test_policy();
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> =
            with_retry_cancellable(&policy, &token, || async { Ok(()) }).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_interrupts_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(30),
            ..test_policy()
        };
        let token = CancellationToken::new();
        let token_clone = token.clone();

        // Cancel shortly after the first failed attempt enters backoff.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token_clone.cancel();
        });

        let start = std::time::Instant::now();
        let result: Result<()> =
            with_retry_cancellable(&policy, &token, || async { Err(unavailable()) }).await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5), "backoff was interrupted");
    }

    #[tokio::test]
    async fn test_cancellable_succeeds_without_cancellation() {
        let policy = test_policy();
        let token = CancellationToken::new();

        let result =
            with_retry_cancellable(&policy, &token, || async { Ok::<_, ClientError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_apply_jitter_zero_factor() {
        let dur = Duration::from_millis(100);
        assert_eq!(apply_jitter(dur, 0.0), dur);
    }

    #[test]
    fn test_apply_jitter_within_bounds() {
        let dur = Duration::from_millis(100);
        for _ in 0..100 {
            let result = apply_jitter(dur, 0.25);
            let millis = result.as_millis();
            assert!(millis >= 75, "jittered value {} is below minimum", millis);
            assert!(millis <= 125, "jittered value {} is above maximum", millis);
        }
    }
}
