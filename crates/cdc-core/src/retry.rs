//! C1: bounded exponential backoff with jitter, filtered to the
//! concurrent-modification failure (spec §4.1).
//!
//! Built directly on the `exponential-backoff` crate rather than hand-rolled
//! backoff math, the same way the teacher's journal client wraps it for its
//! own retryable reads.

use std::time::Duration;

use exponential_backoff::Backoff;

use crate::config::RetryPolicyConfig;
use crate::error::CoreError;

/// Wraps a fallible action in bounded exponential backoff, retrying only on
/// [`CoreError::ConcurrentModification`]. `max_attempts = 1` disables retry.
pub struct RetryHarness {
    policy: RetryPolicyConfig,
}

impl RetryHarness {
    pub fn new(policy: RetryPolicyConfig) -> Self {
        RetryHarness { policy }
    }

    fn backoff(&self) -> Backoff {
        let mut b = Backoff::new(
            self.policy.max_attempts.saturating_sub(1),
            Duration::from_millis(self.policy.min_wait_ms),
            Some(Duration::from_millis(self.policy.max_wait_ms)),
        );
        b.set_jitter(self.policy.jitter_factor);
        b
    }

    /// Runs `action` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is exhausted. Non-`ConcurrentModification` errors
    /// propagate on their first occurrence (spec §4.1).
    pub async fn run<T, F, Fut>(&self, mut action: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let backoff = self.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match action().await {
                Ok(value) => {
                    tracing::trace!(attempt, "retry harness succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_concurrent_modification() => {
                    tracing::trace!(attempt, "concurrent modification, considering retry");
                    match backoff.next(attempt) {
                        Some(wait) => tokio::time::sleep(wait).await,
                        None => {
                            tracing::trace!(attempt, "retry harness exhausted");
                            return Err(CoreError::RetriesExhausted {
                                attempts: attempt,
                                cause: Box::new(err),
                            });
                        }
                    }
                }
                Err(err) => {
                    tracing::trace!(attempt, error = %err, "non-retryable failure, propagating");
                    return Err(err);
                }
            }
        }
    }
}
