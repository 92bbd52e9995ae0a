//! Retry with exponential backoff for transient HTTP failures.
//!
//! Used when starting model downloads. Retries 429/5xx responses and network
//! errors; never retries 4xx client errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Fraction of the backoff delay actually slept when `jitter` is on.
const JITTER_SCALE: f64 = 0.8;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Sleep a fixed fraction of each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Config with the given number of retries and default timing.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let scale = if self.jitter { JITTER_SCALE } else { 1.0 };
        Duration::from_secs_f64(capped * scale)
    }
}

/// Whether an error string indicates a transient (retryable) failure.
pub fn is_transient_error(error: &str) -> bool {
    let transient_statuses = ["429", "500", "502", "503", "504"];
    if transient_statuses
        .iter()
        .any(|s| error.contains(&format!("HTTP {s}")))
    {
        return true;
    }

    let lower = error.to_lowercase();
    [
        "request failed:",
        "connection reset",
        "connection refused",
        "timed out",
        "broken pipe",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && is_transient_error(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{what} failed ({e}); retry {}/{} in {:.1}s",
                    attempt + 1,
                    config.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
