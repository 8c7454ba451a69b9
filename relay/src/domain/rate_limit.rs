//! Windowed rate limiter for hot write paths.
//!
//! The limiter increments first and checks second: the store-side increment
//! is atomic, so concurrent callers cannot double-spend a slot. The count
//! may briefly overshoot the limit by the number of racing callers before
//! they all observe the rejection; that overshoot is bounded and accepted.
//!
//! Failure policy: when the counter store is unreachable the limiter fails
//! open and admits the request. Availability is prioritised over strict
//! enforcement; the outage is logged at warning level for alerting.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::ports::{ExpiryStore, ExpiryStoreError, GuardMetrics};

/// One admission budget: `limit` calls per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitQuota {
    /// Calls admitted per window.
    pub limit: u32,
    /// Fixed window length; the counter expires when it elapses.
    pub window: Duration,
}

impl RateLimitQuota {
    /// Build a quota of `limit` calls per `window`.
    #[must_use]
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Admission control backed by the shared counter store.
///
/// Keys scope the budget to an action and subject, e.g.
/// `submission:user-42`.
pub struct RateLimiter {
    store: Arc<dyn ExpiryStore>,
    metrics: Arc<dyn GuardMetrics>,
}

impl RateLimiter {
    /// Build a limiter over the shared store.
    pub fn new(store: Arc<dyn ExpiryStore>, metrics: Arc<dyn GuardMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Atomically consume one slot for `key` and report whether the call is
    /// within the quota.
    ///
    /// The first increment of a window sets the counter's expiry. Store
    /// outages admit the request (fail open).
    pub async fn is_allowed(&self, key: &str, quota: RateLimitQuota) -> bool {
        match self.store.increment(key, quota.window).await {
            Ok(count) => {
                let allowed = count <= i64::from(quota.limit);
                if !allowed {
                    // Exporter failures must not turn a rejection into an error.
                    let _ = self.metrics.record_rate_limit_hit(key).await;
                }
                allowed
            }
            Err(error) => {
                warn!(key, error = %error, "rate limit store unreachable; failing open");
                true
            }
        }
    }

    /// Slots left in the current window without consuming one.
    ///
    /// # Errors
    ///
    /// Propagates store failures; read-only callers decide their own
    /// degraded behaviour.
    pub async fn get_remaining(
        &self,
        key: &str,
        quota: RateLimitQuota,
    ) -> Result<u32, ExpiryStoreError> {
        let count = self.get_current_count(key).await?;
        let used = u32::try_from(count).unwrap_or(u32::MAX);
        Ok(quota.limit.saturating_sub(used))
    }

    /// Current counter value for `key`; zero when no window is active.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_current_count(&self, key: &str) -> Result<i64, ExpiryStoreError> {
        Ok(self.store.current_count(key).await?.unwrap_or(0))
    }
}
