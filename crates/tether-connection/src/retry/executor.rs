//! Retry executors
//!
//! The blocking and async executors share one decision routine, so a given
//! failure sequence produces the same number of attempts and the same delays
//! in both.

use std::error::Error;
use std::future::Future;
use std::time::Duration;

use super::classify::is_transient;
use super::policy::RetryPolicy;

/// What to do after a failed attempt.
enum Next {
    /// Surface the error to the caller
    GiveUp,
    /// Sleep for this long, then try again
    RetryAfter(Duration),
}

fn on_failure<E>(error: &E, attempt: u32, policy: &RetryPolicy, operation_name: &str) -> Next
where
    E: Error + ?Sized,
{
    if !is_transient(error) {
        tracing::debug!(
            operation = operation_name,
            attempt = attempt + 1,
            error = %error,
            "non-transient failure, not retrying"
        );
        return Next::GiveUp;
    }

    if attempt >= policy.max_attempts() {
        tracing::error!(
            operation = operation_name,
            total_attempts = policy.total_attempts(),
            error = %error,
            "all attempts failed"
        );
        return Next::GiveUp;
    }

    let delay = policy.calculate_delay(attempt);
    tracing::warn!(
        operation = operation_name,
        attempt = attempt + 1,
        total_attempts = policy.total_attempts(),
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "attempt failed, retrying"
    );
    Next::RetryAfter(delay)
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// With retries disabled the operation runs exactly once. Otherwise it runs
/// up to `max_attempts + 1` times; a non-transient error, or a transient one
/// on the last attempt, is returned unchanged. Any `Ok` value, including an
/// empty or zero one, ends the loop.
pub fn retry_operation<T, E, F>(
    mut operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Error,
{
    if !policy.enabled() {
        return operation();
    }

    let mut attempt = 0u32;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => match on_failure(&err, attempt, policy, operation_name) {
                Next::GiveUp => return Err(err),
                Next::RetryAfter(delay) => {
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            },
        }
    }
}

/// Async counterpart of [`retry_operation`].
///
/// Sleeps with `tokio::time::sleep`, so the worker thread is free while
/// waiting between attempts.
pub async fn retry_operation_async<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error,
{
    if !policy.enabled() {
        return operation().await;
    }

    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => match on_failure(&err, attempt, policy, operation_name) {
                Next::GiveUp => return Err(err),
                Next::RetryAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}
