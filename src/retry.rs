//! Rate-limited retry with exponential backoff and jitter
//!
//! `BackoffExecutor::execute` wraps one logical remote call. Each attempt
//! first passes the rate limiter, then invokes the call. Transient failures
//! (429, 500, 503, connection errors) are retried after a delay of
//! `base_delay * 2^attempt * jitter` with jitter drawn from `[0.5, 1.5)`.
//! Anything else is returned on the spot.

use crate::error::{GmailError, Result};
use crate::rate_limiter::RateLimiter;
use crate::stats::StatsAggregator;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Lower bound of the jitter factor (inclusive)
pub const JITTER_MIN: f64 = 0.5;
/// Upper bound of the jitter factor (exclusive)
pub const JITTER_MAX: f64 = 1.5;

/// How many times and how slowly to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Upper bound on underlying calls per `execute`
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based)
    ///
    /// Uncapped; saturates at `Duration::MAX` only when the value is not
    /// representable.
    pub fn delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let seconds = self.base_delay.as_secs_f64() * 2f64.powi(exponent) * jitter;
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Same as `delay_for_attempt` with a random jitter factor
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX);
        self.delay_for_attempt(attempt, jitter)
    }
}

/// Runs remote calls through the limiter and retries transient failures
#[derive(Debug, Clone)]
pub struct BackoffExecutor {
    limiter: RateLimiter,
    policy: RetryPolicy,
    stats: Arc<StatsAggregator>,
}

impl BackoffExecutor {
    pub fn new(limiter: RateLimiter, policy: RetryPolicy, stats: Arc<StatsAggregator>) -> Self {
        Self {
            limiter,
            policy,
            stats,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Execute `call` with rate limiting and retry
    ///
    /// Makes at most `max_retries + 1` calls. A transient failure on the last
    /// attempt comes back as `GmailError::RetriesExhausted`, which is no
    /// longer transient, so outer layers never retry it again.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            self.limiter.wait_if_needed().await;

            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_transient() {
                debug!("{} failed permanently: {}", label, error);
                return Err(error);
            }

            if attempt >= self.policy.max_retries {
                return Err(GmailError::RetriesExhausted {
                    operation: label.to_string(),
                    attempts: attempt + 1,
                    source: Box::new(error),
                });
            }

            let delay = self.policy.jittered_delay(attempt);
            self.stats.record_retry(error.is_rate_limit());
            warn!(
                "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                label,
                attempt + 1,
                max_attempts,
                error,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
