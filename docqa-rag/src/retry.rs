//! Per-call timeouts and bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RagError, Result, Stage};

/// Timeout and retry budget applied to each outbound provider call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds. Doubles on each retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Randomize each delay within `[delay / 2, delay]`.
    pub jitter: bool,
    /// Timeout for a single attempt, in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: true,
            call_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Set the number of retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base and maximum backoff delays.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// The per-attempt timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Backoff before retry number `retry` (1-based), before jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if !self.jitter || ms < 2 {
            return delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(ms / 2..=ms))
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. Each attempt is bounded by the call timeout.
    ///
    /// # Errors
    ///
    /// Returns the last error observed. A timed-out attempt surfaces as
    /// [`RagError::Timeout`] attributed to `stage`.
    pub async fn run<T, F, Fut>(&self, stage: Stage, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(self.call_timeout(), call()).await {
                Ok(result) => result,
                Err(_) => Err(RagError::Timeout {
                    stage,
                    operation: operation.to_string(),
                    timeout_ms: self.call_timeout_ms,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.jittered(self.backoff(attempt));
                    warn!(
                        %stage,
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
