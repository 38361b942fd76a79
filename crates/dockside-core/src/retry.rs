//! Retry with exponential backoff.
//!
//! One standardized policy for every outbound HTTP call in the pipeline.
//! Only errors the caller classifies as transient are retried; a 4xx
//! fails immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Random jitter range as a fraction of the delay.
    pub jitter_percent: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Policy for OCR requests: 3 attempts, page-sized payloads are slow
    /// so backoff starts higher.
    #[must_use]
    pub fn ocr() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            ..Self::default()
        }
    }

    /// Policy for embedding requests: 3 attempts, 200 ms initial.
    #[must_use]
    pub fn embedding() -> Self {
        Self::default()
    }

    /// Delay before the retry following `attempt` (0-based), jittered.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter_percent > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_percent..=self.jitter_percent)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }
}

/// Run `op` under `policy`, retrying while `is_transient` says the error
/// may clear. Returns the last error once attempts are exhausted.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_transient: P,
    op: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !is_transient(&err) {
                    if attempt > 1 {
                        warn!(attempts = attempt, error = %err, "giving up after retries");
                    }
                    return Err(err);
                }
                let delay = policy.delay_for(attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
