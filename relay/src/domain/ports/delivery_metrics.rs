//! Port abstraction for outbox delivery metrics.

use async_trait::async_trait;

/// Errors raised by metrics exporters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryMetricsError {
    /// The exporter could not record the observation.
    #[error("delivery metrics export failed: {message}")]
    Export { message: String },
}

impl DeliveryMetricsError {
    /// Create an export error with the given message.
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export {
            message: message.into(),
        }
    }
}

/// Port for publish-path counters.
///
/// Callers treat exporter failures as non-fatal: a failed counter write must
/// never abort delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryMetrics: Send + Sync {
    /// Count one confirmed delivery on `topic`.
    async fn record_published(&self, topic: &str) -> Result<(), DeliveryMetricsError>;

    /// Count one failed publish, tagged by topic and event type.
    async fn record_publish_error(
        &self,
        topic: &str,
        event_type: &str,
    ) -> Result<(), DeliveryMetricsError>;

    /// Count one event parked in terminal failed status.
    async fn record_terminal_failure(
        &self,
        topic: &str,
        event_type: &str,
    ) -> Result<(), DeliveryMetricsError>;
}

/// No-op metrics implementation for tests and minimal wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDeliveryMetrics;

#[async_trait]
impl DeliveryMetrics for NoOpDeliveryMetrics {
    async fn record_published(&self, _topic: &str) -> Result<(), DeliveryMetricsError> {
        Ok(())
    }

    async fn record_publish_error(
        &self,
        _topic: &str,
        _event_type: &str,
    ) -> Result<(), DeliveryMetricsError> {
        Ok(())
    }

    async fn record_terminal_failure(
        &self,
        _topic: &str,
        _event_type: &str,
    ) -> Result<(), DeliveryMetricsError> {
        Ok(())
    }
}
