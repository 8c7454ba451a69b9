//! Port abstraction for admission-control metrics.
//!
//! Covers the counters the circuit breaker and rate limiter emit for
//! alerting: breaker state transitions and rate-limit rejections.

use async_trait::async_trait;

use crate::domain::circuit_breaker::BreakerState;

/// Errors raised by metrics exporters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardMetricsError {
    /// The exporter could not record the observation.
    #[error("guard metrics export failed: {message}")]
    Export { message: String },
}

impl GuardMetricsError {
    /// Create an export error with the given message.
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export {
            message: message.into(),
        }
    }
}

/// Port for admission-control counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuardMetrics: Send + Sync {
    /// Count one rate-limit rejection for `key`.
    async fn record_rate_limit_hit(&self, key: &str) -> Result<(), GuardMetricsError>;

    /// Count one breaker state transition.
    async fn record_breaker_transition(
        &self,
        breaker: &str,
        from: BreakerState,
        to: BreakerState,
    ) -> Result<(), GuardMetricsError>;
}

/// No-op metrics implementation for tests and minimal wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpGuardMetrics;

#[async_trait]
impl GuardMetrics for NoOpGuardMetrics {
    async fn record_rate_limit_hit(&self, _key: &str) -> Result<(), GuardMetricsError> {
        Ok(())
    }

    async fn record_breaker_transition(
        &self,
        _breaker: &str,
        _from: BreakerState,
        _to: BreakerState,
    ) -> Result<(), GuardMetricsError> {
        Ok(())
    }
}
