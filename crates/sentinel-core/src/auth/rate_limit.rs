use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheService;
use crate::error::SentinelError;
use crate::metrics::Metrics;

const KEY_PREFIX: &str = "rate_limit";

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }
}

/// Fixed-window rate limiter backed by the shared cache.
///
/// Each call increments the address's counter; the first increment of a
/// window sets its expiry, in the same atomic step. Denied calls still count,
/// so a client hammering the limit does not shorten its own window.
///
/// Windows are fixed, not sliding: a burst straddling a window edge can see
/// up to twice `max_requests` admitted across the boundary.
#[derive(Clone)]
pub struct RateLimiter {
    cache: CacheService,
    metrics: Arc<Metrics>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        cache: CacheService,
        metrics: Arc<Metrics>,
        max_requests: u64,
        window: Duration,
    ) -> Self {
        Self {
            cache,
            metrics,
            max_requests,
            window,
        }
    }

    /// Count one request from `address` and decide whether to admit it.
    pub async fn admit(&self, address: &str) -> Result<Admission, SentinelError> {
        let key = format!("{}:{}", KEY_PREFIX, address);
        let count = self.cache.incr_with_expiry(&key, self.window).await?;

        if count > self.max_requests {
            self.metrics.record_rate_limited();
            tracing::warn!(%address, count, limit = self.max_requests, "rate limit exceeded");
            return Ok(Admission::Deny);
        }
        Ok(Admission::Allow)
    }
}
