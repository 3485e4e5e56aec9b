//! Bounded exponential backoff over transient network failures.
//!
//! A [`RetryPolicy`] is plain configuration: it is shared freely and every call to
//! [`RetryPolicy::execute`] keeps its own attempt counter. Only failures whose
//! [`FailureClass`](super::FailureClass) is transient are retried; anything else, including
//! a non-success answer from the remote service, is handed back after the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::{Classify, Interrupted};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry (default: 4s)
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on any single delay (default: 10s)
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Factor applied to the delay after each retry (default: 2)
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay slept before retry number `retry` (0-based): `base_delay * multiplier^retry`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// On exhaustion the error from the last attempt is returned unchanged, so it still
    /// classifies as a transient network failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        match self.run(operation, None, op).await {
            Ok(result) => result,
            Err(Interrupted) => unreachable!("no cancellation token was supplied"),
        }
    }

    /// Like [`execute`](Self::execute), but stops as soon as `token` is cancelled.
    ///
    /// Cancellation wins every race: an in-flight attempt is dropped, a pending backoff
    /// sleep is cut short, and no attempt is started once the token has fired.
    pub async fn execute_cancellable<T, E, F, Fut>(&self, operation: &str, token: &CancellationToken, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display + From<Interrupted>,
    {
        match self.run(operation, Some(token), op).await {
            Ok(result) => result,
            Err(interrupted) => Err(E::from(interrupted)),
        }
    }

    async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        token: Option<&CancellationToken>,
        mut op: F,
    ) -> Result<Result<T, E>, Interrupted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if token.is_some_and(|t| t.is_cancelled()) {
                tracing::debug!(operation, attempt, "Cancelled before attempt could start");
                return Err(Interrupted);
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancelled(token) => {
                    tracing::debug!(operation, attempt, "Cancelled during attempt");
                    return Err(Interrupted);
                }
                result = op() => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(Ok(value));
                }
                Err(error) => error,
            };

            let class = error.failure_class();
            if !class.is_transient() {
                tracing::debug!(operation, attempt, class = class.as_str(), error = %error, "Permanent failure, not retrying");
                return Ok(Err(error));
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    operation,
                    attempt,
                    class = class.as_str(),
                    error = %error,
                    "Transient failure, retry attempts exhausted"
                );
                return Ok(Err(error));
            }

            let delay = self.delay_for(attempt - 1);
            counter!("depogate_upload_retries_total", "operation" => operation.to_string()).increment(1);
            tracing::warn!(
                operation,
                attempt,
                next_attempt = attempt + 1,
                backoff_ms = delay.as_millis() as u64,
                class = class.as_str(),
                error = %error,
                "Transient failure, retrying with exponential backoff"
            );

            tokio::select! {
                biased;
                _ = cancelled(token) => {
                    tracing::debug!(operation, attempt, "Cancelled during backoff");
                    return Err(Interrupted);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
