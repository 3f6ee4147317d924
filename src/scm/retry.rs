use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{ScmError, ScmResult};

/// Bounded retry with exponential backoff for hosting API calls.
///
/// Only transient errors (rate limits, transport failures) are retried. Both
/// the call and the backoff sleep race against `shutdown`.
#[derive(Debug, Clone)]
pub struct Retrier {
    max_attempts: u32,
    min_delay: Duration,
    max_delay: Duration,
    shutdown: CancellationToken,
}

impl Retrier {
    pub fn new(
        max_attempts: u32,
        min_delay: Duration,
        max_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay: max_delay.max(min_delay),
            shutdown,
        }
    }

    /// Backoff after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.min_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> ScmResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ScmResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(ScmError::Cancelled),
                result = call() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying hosting API call"
                    );

                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Err(ScmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(operation, attempts = attempt, error = %err, "Retry budget exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}
