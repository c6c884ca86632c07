//! Retry with exponential backoff and jitter for content generation.
//!
//! Retries [`ContentError::Unavailable`] failures with configurable
//! exponential backoff. Permanent failures (generation errors, out-of-range
//! windows) are never retried.

use std::time::Duration;

use tracing::warn;

use super::{ContentBlob, ContentError, ContentProvider};
use crate::WindowIndex;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = fail on the first error).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Whether to scale delays by a jitter factor.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// A config that never retries.
    pub fn disabled() -> Self {
        Self::with_retries(0)
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Whether a failure on `attempt` (0-indexed) should be retried.
    pub fn should_retry(&self, attempt: u32, error: &ContentError) -> bool {
        attempt < self.max_retries && error.is_transient()
    }
}

/// Generate `window`, retrying transient failures per `config`.
pub(crate) async fn generate_with_retry(
    provider: &dyn ContentProvider,
    window: WindowIndex,
    config: &RetryConfig,
) -> Result<ContentBlob, ContentError> {
    let mut attempt = 0;
    loop {
        match provider.generate(window).await {
            Ok(blob) => return Ok(blob),
            Err(e) if config.should_retry(attempt, &e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "window {window} load attempt {} failed: {e}; retrying in {delay:?}",
                    attempt + 1
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
