//! Bounded retry policy for judge calls
//!
//! One policy object is applied at the single judge call site; adapters never
//! loop on their own. Each attempt runs under its own timeout, and a timed-out
//! attempt is treated like any other transient failure.

use crate::config::RetryConfig;
use crate::scoring::types::JudgeError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.multiplier.max(1.0),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout,
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(ms as u64).min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// Returns the number of attempts made alongside the final result.
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> (u32, Result<T, JudgeError>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, JudgeError>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(JudgeError::Timeout(self.attempt_timeout)),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(judge = label, attempt, "Judge call succeeded after retry");
                    }
                    return (attempt, Ok(value));
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_for(attempt);
                    tracing::warn!(
                        judge = label,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Judge call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::warn!(
                        judge = label,
                        attempt,
                        kind = err.kind(),
                        error = %err,
                        "Judge call failed"
                    );
                    return (attempt, Err(err));
                }
            }
        }
    }
}
