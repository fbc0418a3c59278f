//! Rolling-window rate limiting
//!
//! Every export API call takes one permit. A permit stays checked out for the
//! full window after it was granted, so no rolling window of that length ever
//! sees more than `max_requests` calls, no matter how many workers share the
//! limiter.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::warn;

use crate::metrics::RateLimiterMetrics;

/// Permission to issue one outbound request
///
/// The HTTP client depends on this trait rather than on [`RateLimiter`] so
/// tests can substitute a fake.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Wait until one more request may be issued
    async fn acquire(&self);
}

/// Request-based rate limiter over a rolling window
#[derive(Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Create a request-based rate limiter
    ///
    /// # Arguments
    /// * `max_requests` - Maximum requests per window (at least 1)
    /// * `window` - Length of the rolling window
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_requests)),
            max_requests,
            window,
        }
    }

    /// Maximum requests per window
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Permits that could be granted right now without waiting
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire one permit
    ///
    /// Waiters are served in arrival order. The permit returns to the pool
    /// `window` after it was granted.
    pub async fn acquire(&self) {
        let mut metrics = RateLimiterMetrics::new();
        metrics.start_acquire();

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                // The semaphore is never closed, so this is unreachable in practice.
                warn!(error = %e, "rate limiter semaphore closed, not throttling");
                return;
            }
        };

        metrics.record_acquired();
        metrics.update_available_permits(self.semaphore.available_permits());

        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            drop(permit);
        });
    }
}

#[async_trait]
impl Throttle for RateLimiter {
    async fn acquire(&self) {
        RateLimiter::acquire(self).await
    }
}

/// Throttle that never waits
#[derive(Debug, Clone, Copy, Default)]
pub struct Unthrottled;

#[async_trait]
impl Throttle for Unthrottled {
    async fn acquire(&self) {}
}
