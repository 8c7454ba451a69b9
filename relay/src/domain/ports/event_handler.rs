//! Port abstraction for consumer-side event handling.

use async_trait::async_trait;

use crate::domain::event::EventEnvelope;

/// Errors raised by event handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventHandlerError {
    /// The handler failed to apply the event's side effects.
    #[error("event handler failed: {message}")]
    Failed { message: String },
}

impl EventHandlerError {
    /// Create a handler failure with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Port invoked for events that pass the duplicate gate.
///
/// Handlers apply the business side effects of one inbound event. They run
/// at most once per event id within the dedup window; failures propagate to
/// the transport's redelivery machinery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Apply the side effects for `event`.
    async fn handle(&self, event: &EventEnvelope) -> Result<(), EventHandlerError>;
}
