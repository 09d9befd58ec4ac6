//! Minimum-spacing rate limiter for Gmail API calls
//!
//! Every remote call goes through `wait_if_needed` first. The limiter keeps
//! the timestamp of the previous call and sleeps until at least
//! `1 / requests_per_second` has elapsed since it. A rate of zero disables
//! the limiter entirely.
//!
//! Timestamps use `tokio::time::Instant` so tests can run under paused time.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Spacing gate shared by all calls of one run
///
/// Clones share the same state, so a limiter handed to several collaborators
/// still enforces one global spacing.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    inner: Arc<Mutex<RateLimiterState>>,
}

#[derive(Debug, Default)]
struct RateLimiterState {
    /// When the previous call was released
    last_call: Option<Instant>,
    /// Calls released so far
    total_calls: u64,
}

impl RateLimiter {
    /// Create a limiter allowing at most `requests_per_second` calls per second
    ///
    /// Zero, negative and non-finite rates disable limiting.
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };

        Self {
            min_interval,
            inner: Arc::new(Mutex::new(RateLimiterState::default())),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn is_enabled(&self) -> bool {
        !self.min_interval.is_zero()
    }

    /// Wait until the next call is allowed
    ///
    /// The lock is held across the sleep so concurrent callers queue up
    /// behind each other instead of all waking at the same deadline.
    pub async fn wait_if_needed(&self) {
        let mut state = self.inner.lock().await;
        state.total_calls += 1;

        if !self.is_enabled() {
            return;
        }

        if let Some(last_call) = state.last_call {
            let elapsed = last_call.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Rate limiter sleeping {:.3}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            } else {
                trace!("Rate limiter idle for {:.3}s, no wait", elapsed.as_secs_f64());
            }
        }

        state.last_call = Some(Instant::now());
    }

    /// Number of calls that have passed through the limiter
    pub async fn total_calls(&self) -> u64 {
        self.inner.lock().await.total_calls
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
