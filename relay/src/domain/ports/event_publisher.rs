//! Port abstraction for the message broker publish path.

use async_trait::async_trait;

use crate::domain::event::OutboxEvent;

/// Broker acknowledgment for one accepted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerAck {
    /// Partition the broker assigned the event to.
    pub partition: i32,
    /// Offset of the event within the partition.
    pub offset: i64,
}

/// Errors raised on the publish path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventPublishError {
    /// The broker did not acknowledge within the publish timeout.
    ///
    /// The send may still land broker-side after the deadline, so a later
    /// retry can produce a second accepted copy; consumer-side dedup by
    /// event id covers that gap.
    #[error("broker acknowledgment timed out: {message}")]
    Timeout { message: String },
    /// Transport-level failure reaching the broker.
    #[error("broker transport failed: {message}")]
    Transport { message: String },
    /// The broker accepted the connection but rejected the event.
    #[error("broker rejected event: {message}")]
    Rejected { message: String },
    /// The circuit breaker is open; the call failed fast without reaching
    /// the broker.
    #[error("circuit breaker '{breaker}' is open; failing fast")]
    CircuitOpen { breaker: String },
}

impl EventPublishError {
    /// Create a timeout error with the given message.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a transport error with the given message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a rejection error with the given message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Create a fail-fast error naming the open breaker.
    pub fn circuit_open(breaker: impl Into<String>) -> Self {
        Self::CircuitOpen {
            breaker: breaker.into(),
        }
    }

    /// Whether a later attempt may succeed.
    ///
    /// Rejections are terminal for the payload; everything else is a
    /// transient infrastructure condition.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Port for sending events to the broker.
///
/// `publish` must wait for the broker acknowledgment before returning
/// success: a fire-and-forget send risks marking an event published that the
/// broker never accepted. Callers bound the wait with an explicit timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Send `event` to its topic under its partition key and wait for the
    /// broker acknowledgment.
    async fn publish(&self, event: &OutboxEvent) -> Result<BrokerAck, EventPublishError>;
}
