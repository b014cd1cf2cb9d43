//! Bounded retry with a fixed backoff.
//!
//! Encoder slot acquisition and output polling both wait on hardware-style
//! codecs that answer "try again later". Every such wait goes through
//! [`retry_blocking`], so there is always an upper bound on how long a
//! caller can be stalled and exhaustion is reported as its own error.

use std::time::{Duration, Instant};

use crate::config::RetryPolicy;

/// Runs `attempt` until it yields a value, fails, or the policy is exhausted.
///
/// - `Ok(Some(value))` returns the value.
/// - `Ok(None)` means "not ready yet": sleep for the backoff and retry.
/// - `Err(e)` is returned immediately without retrying.
///
/// On exhaustion, `on_exhausted` is called with the total time waited and
/// the number of attempts made to build the error returned to the caller.
///
/// This blocks the current thread; call it from a blocking context.
pub(crate) fn retry_blocking<T, E>(
    policy: RetryPolicy,
    mut attempt: impl FnMut() -> Result<Option<T>, E>,
    on_exhausted: impl FnOnce(Duration, u32) -> E,
) -> Result<T, E> {
    let started = Instant::now();
    let max_attempts = policy.max_attempts();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let Some(value) = attempt()? {
            return Ok(value);
        }

        let waited = started.elapsed();
        if attempts >= max_attempts || waited >= policy.timeout {
            return Err(on_exhausted(waited, attempts));
        }

        std::thread::sleep(policy.backoff);
    }
}
